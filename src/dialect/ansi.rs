use crate::dialect::Dialect;

/// Plain ANSI SQL dialect: double-quote quoting, `for share`/`for update`
/// locking, generated-keys identity retrieval. The default when nothing more
/// specific is configured.
#[derive(Debug, Default)]
pub struct AnsiDialect;

impl Dialect for AnsiDialect {
    fn name(&self) -> &'static str {
        "ansi"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{LockMode, LockTimeout};

    #[test]
    fn test_quote_if_needed() {
        let d = AnsiDialect;
        assert_eq!(d.quote_if_needed("balance"), "balance");
        assert_eq!(d.quote_if_needed("order"), "\"order\"");
        assert_eq!(d.quote_if_needed("Strange Name"), "\"Strange Name\"");
    }

    #[test]
    fn test_lock_fragments() {
        let d = AnsiDialect;
        assert_eq!(d.lock_fragment(LockMode::None, LockTimeout::WaitForever), "");
        assert_eq!(d.lock_fragment(LockMode::Read, LockTimeout::WaitForever), "");
        assert_eq!(
            d.lock_fragment(LockMode::PessimisticWrite, LockTimeout::WaitForever),
            " for update"
        );
        assert_eq!(
            d.lock_fragment(LockMode::PessimisticWrite, LockTimeout::NoWait),
            " for update nowait"
        );
        assert_eq!(
            d.lock_fragment(LockMode::PessimisticRead, LockTimeout::Millis(1500)),
            " for share wait 2"
        );
    }

    #[test]
    fn test_case_when_not_null() {
        let d = AnsiDialect;
        let sql = d.case_when_not_null(&[
            ("e1.employee_id".to_string(), "2".to_string()),
            ("e0.person_id".to_string(), "1".to_string()),
        ]);
        assert_eq!(
            sql,
            "case when e1.employee_id is not null then 2 when e0.person_id is not null then 1 end"
        );
    }
}
