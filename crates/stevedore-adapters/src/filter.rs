//! Key filtering for scraped log entries.

/// Decides whether a scraped key should be dropped.
pub trait Filter: Send + Sync {
    fn matches(&self, value: &str) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn matches(&self, value: &str) -> bool {
        self(value)
    }
}

/// Drops keys that appear on a fixed list.
pub struct ValueFilter {
    pub values: Vec<String>,
}

impl Filter for ValueFilter {
    fn matches(&self, value: &str) -> bool {
        self.values.iter().any(|candidate| candidate == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_filter_matches_exact_values_only() {
        let filter = ValueFilter {
            values: vec!["password".into(), "secret".into()],
        };
        assert!(filter.matches("password"));
        assert!(filter.matches("secret"));
        assert!(!filter.matches("passwords"));
        assert!(!filter.matches("msg"));
    }

    #[test]
    fn closures_act_as_filters() {
        let filter = |value: &str| value.starts_with("x-");
        assert!(Filter::matches(&filter, "x-internal"));
        assert!(!Filter::matches(&filter, "msg"));
    }
}
