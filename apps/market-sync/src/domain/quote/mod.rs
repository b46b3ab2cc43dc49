//! Quote Book
//!
//! Latest quote per subscribed symbol, merged field by field from `quotes`
//! fragments. Fields a fragment omits keep their previous value.

use std::collections::{BTreeSet, HashMap};

use rust_decimal::Decimal;

use crate::domain::streaming::{QuoteFragment, Symbol};

/// Accumulated quote of one symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Quote {
    /// Exchange timestamp as sent by the server.
    pub datetime: Option<String>,
    /// Last traded price.
    pub last_price: Option<Decimal>,
    /// Best ask.
    pub ask_price1: Option<Decimal>,
    /// Best ask size.
    pub ask_volume1: Option<Decimal>,
    /// Best bid.
    pub bid_price1: Option<Decimal>,
    /// Best bid size.
    pub bid_volume1: Option<Decimal>,
    /// Session high.
    pub highest: Option<Decimal>,
    /// Session low.
    pub lowest: Option<Decimal>,
    /// Session open.
    pub open: Option<Decimal>,
    /// Session close.
    pub close: Option<Decimal>,
    /// Volume-weighted average price.
    pub average: Option<Decimal>,
    /// Cumulative volume.
    pub volume: Option<Decimal>,
    /// Cumulative turnover.
    pub amount: Option<Decimal>,
    /// Open interest.
    pub open_interest: Option<Decimal>,
    /// Previous close.
    pub pre_close: Option<Decimal>,
    /// Previous settlement.
    pub pre_settlement: Option<Decimal>,
    /// Settlement price.
    pub settlement: Option<Decimal>,
    /// Upper price limit.
    pub upper_limit: Option<Decimal>,
    /// Lower price limit.
    pub lower_limit: Option<Decimal>,
}

macro_rules! merge_fields {
    ($target:expr, $patch:expr, $($field:ident),+ $(,)?) => {
        $(
            if $patch.$field.is_some() {
                $target.$field = $patch.$field;
            }
        )+
    };
}

impl Quote {
    /// Merge a fragment.
    pub fn apply(&mut self, fragment: &QuoteFragment) {
        if fragment.datetime.is_some() {
            self.datetime.clone_from(&fragment.datetime);
        }
        merge_fields!(
            self,
            fragment,
            last_price,
            ask_price1,
            ask_volume1,
            bid_price1,
            bid_volume1,
            highest,
            lowest,
            open,
            close,
            average,
            volume,
            amount,
            open_interest,
            pre_close,
            pre_settlement,
            settlement,
            upper_limit,
            lower_limit,
        );
    }

    /// Mid price, when both sides are quoted.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.bid_price1, self.ask_price1) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }
}

/// Subscribed symbols and their latest quotes.
#[derive(Debug, Default)]
pub struct QuoteBook {
    subscribed: BTreeSet<Symbol>,
    quotes: HashMap<Symbol, Quote>,
}

impl QuoteBook {
    /// Create an empty book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add symbols to the subscription set.
    ///
    /// Returns `true` if the set changed.
    pub fn subscribe<I, S>(&mut self, symbols: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let before = self.subscribed.len();
        self.subscribed.extend(symbols.into_iter().map(Into::into));
        self.subscribed.len() != before
    }

    /// Comma-separated subscription list, as sent in `subscribe_quote`.
    #[must_use]
    pub fn ins_list(&self) -> String {
        self.subscribed
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Check if any symbol is subscribed.
    #[must_use]
    pub fn has_subscriptions(&self) -> bool {
        !self.subscribed.is_empty()
    }

    /// Latest quote of a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<&Quote> {
        self.quotes.get(symbol)
    }

    /// Merge quote fragments. Returns the symbols updated.
    pub fn apply(&mut self, fragments: &HashMap<Symbol, QuoteFragment>) -> Vec<Symbol> {
        let mut updated: Vec<Symbol> = fragments
            .iter()
            .map(|(symbol, fragment)| {
                self.quotes.entry(symbol.clone()).or_default().apply(fragment);
                symbol.clone()
            })
            .collect();
        updated.sort();
        updated
    }

    /// Drop all quotes (transport loss). Subscriptions are kept.
    pub fn reset(&mut self) {
        self.quotes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_merge_field_by_field() {
        let mut book = QuoteBook::new();
        book.apply(&HashMap::from([(
            "A".to_string(),
            QuoteFragment {
                last_price: Some(Decimal::new(100, 0)),
                bid_price1: Some(Decimal::new(99, 0)),
                ..QuoteFragment::default()
            },
        )]));
        let updated = book.apply(&HashMap::from([(
            "A".to_string(),
            QuoteFragment {
                ask_price1: Some(Decimal::new(101, 0)),
                ..QuoteFragment::default()
            },
        )]));

        assert_eq!(updated, vec!["A".to_string()]);
        let quote = book.get("A").unwrap();
        assert_eq!(quote.last_price, Some(Decimal::new(100, 0)));
        assert_eq!(quote.mid_price(), Some(Decimal::new(100, 0)));
    }

    #[test]
    fn subscription_list_is_sorted_and_deduplicated() {
        let mut book = QuoteBook::new();
        assert!(book.subscribe(["B", "A"]));
        assert!(!book.subscribe(["A"]));
        assert_eq!(book.ins_list(), "A,B");
        assert!(book.has_subscriptions());
    }

    #[test]
    fn reset_keeps_subscriptions() {
        let mut book = QuoteBook::new();
        book.subscribe(["A"]);
        book.apply(&HashMap::from([("A".to_string(), QuoteFragment::default())]));
        book.reset();
        assert!(book.get("A").is_none());
        assert_eq!(book.ins_list(), "A");
    }
}
