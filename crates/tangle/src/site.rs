use std::fmt;
use std::panic::Location;

/// Call-site tag attached to every operation. Diagnostic only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Site {
    location: &'static Location<'static>,
}

impl Site {
    #[track_caller]
    pub fn caller() -> Self {
        Self {
            location: Location::caller(),
        }
    }

    pub fn file(self) -> &'static str {
        self.location.file()
    }

    pub fn line(self) -> u32 {
        self.location.line()
    }
}

impl From<&'static Location<'static>> for Site {
    fn from(location: &'static Location<'static>) -> Self {
        Self { location }
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.location.file(), self.location.line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_points_at_the_call() {
        let line = line!() + 1;
        let site = Site::caller();
        assert_eq!(site.line(), line);
        assert!(site.to_string().ends_with(&format!("site.rs:{line}")));
    }
}
