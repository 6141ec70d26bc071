use std::time::Duration;
use time::OffsetDateTime;

/// `now - horizon`, saturating at the earliest representable timestamp.
pub fn cutoff(now: OffsetDateTime, horizon: Duration) -> OffsetDateTime {
    now.checked_sub(time::Duration::try_from(horizon).unwrap_or(time::Duration::MAX))
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cutoff() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(cutoff(now, Duration::from_secs(60)), now - Duration::from_secs(60));
        assert_eq!(cutoff(now, Duration::MAX), OffsetDateTime::UNIX_EPOCH);
    }
}
