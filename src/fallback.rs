use crate::error::LandsatError;

/// Result of trying an ordered list of candidates.
#[derive(Debug)]
pub enum FirstSuccess<'a, T> {
    Found { candidate: &'a str, value: T },
    AllFailed(Vec<(&'a str, LandsatError)>),
}

impl<'a, T> FirstSuccess<'a, T> {
    pub fn value(self) -> Option<T> {
        match self {
            FirstSuccess::Found { value, .. } => Some(value),
            FirstSuccess::AllFailed(_) => None,
        }
    }

    pub fn failures(&self) -> &[(&'a str, LandsatError)] {
        match self {
            FirstSuccess::Found { .. } => &[],
            FirstSuccess::AllFailed(failures) => failures,
        }
    }
}

/// Tries each candidate in order and stops at the first `Ok`.
pub fn first_success<'a, T, F>(candidates: &'a [String], mut attempt: F) -> FirstSuccess<'a, T>
where
    F: FnMut(&str) -> Result<T, LandsatError>,
{
    let mut failures = Vec::new();
    for candidate in candidates {
        match attempt(candidate) {
            Ok(value) => {
                return FirstSuccess::Found {
                    candidate: candidate.as_str(),
                    value,
                };
            }
            Err(err) => {
                tracing::debug!(candidate = %candidate, error = %err, "candidate failed");
                failures.push((candidate.as_str(), err));
            }
        }
    }
    FirstSuccess::AllFailed(failures)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn ids() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn stops_at_first_success() {
        let candidates = ids();
        let mut tried = Vec::new();
        let outcome = first_success(&candidates, |id| {
            tried.push(id.to_string());
            if id == "b" {
                Ok(42u64)
            } else {
                Err(LandsatError::MetadataProbe(id.to_string()))
            }
        });
        assert_matches!(outcome, FirstSuccess::Found { candidate: "b", value: 42 });
        assert_eq!(tried, vec!["a", "b"]);
    }

    #[test]
    fn collects_every_failure() {
        let candidates = ids();
        let outcome: FirstSuccess<'_, u64> =
            first_success(&candidates, |id| Err(LandsatError::MetadataProbe(id.to_string())));
        assert_eq!(outcome.failures().len(), 3);
        assert!(outcome.value().is_none());
    }

    #[test]
    fn empty_candidate_list_fails() {
        let outcome: FirstSuccess<'_, ()> = first_success(&[], |_| Ok(()));
        assert_matches!(outcome, FirstSuccess::AllFailed(ref failures) if failures.is_empty());
    }
}
