use chrono::{DateTime, Local, Utc};

/// Wall-clock source injected into repositories.
pub trait TimeSource: Send + Sync {
    fn utc_now(&self) -> DateTime<Utc>;

    fn local_now(&self) -> DateTime<Local> {
        self.utc_now().with_timezone(&Local)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Always returns the same instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedTimeSource(pub DateTime<Utc>);

impl TimeSource for FixedTimeSource {
    fn utc_now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn fixed_source_is_stable() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let clock = FixedTimeSource(at);
        assert_eq!(clock.utc_now(), at);
        assert_eq!(clock.local_now().with_timezone(&Utc), at);
    }

    #[test]
    fn system_source_moves_forward() {
        let clock = SystemTimeSource;
        let a = clock.utc_now();
        let b = clock.utc_now();
        assert!(b >= a);
    }
}
