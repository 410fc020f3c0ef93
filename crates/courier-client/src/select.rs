//! Best-match selection for outbound routing.
//!
//! Priority is strict: an exact `(api_key, platform)` match wins; failing
//! that, any api_key match; failing that, any platform match. Candidates
//! are examined in supervisor insertion order, so the earliest-added
//! connection breaks every tie deterministically.

/// Routing coordinates of one connected candidate.
#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub api_key: &'a str,
    pub platform: &'a str,
}

/// Index of the best-matching candidate, or `None` if nothing matches on
/// either dimension.
#[must_use]
pub fn best_match(candidates: &[Candidate<'_>], api_key: &str, platform: &str) -> Option<usize> {
    candidates
        .iter()
        .position(|c| c.api_key == api_key && c.platform == platform)
        .or_else(|| candidates.iter().position(|c| c.api_key == api_key))
        .or_else(|| candidates.iter().position(|c| c.platform == platform))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates<'a>(coords: &'a [(&'a str, &'a str)]) -> Vec<Candidate<'a>> {
        coords
            .iter()
            .map(|(api_key, platform)| Candidate { api_key, platform })
            .collect()
    }

    #[test]
    fn exact_match_wins() {
        let pool = candidates(&[("kA", "wechat"), ("kA", "qq"), ("kB", "wechat")]);
        assert_eq!(best_match(&pool, "kA", "qq"), Some(1));
        assert_eq!(best_match(&pool, "kB", "wechat"), Some(2));
    }

    #[test]
    fn api_key_match_beats_platform_match() {
        // kA exists but not on telegram; kB is on telegram.
        let pool = candidates(&[("kB", "telegram"), ("kA", "wechat")]);
        assert_eq!(best_match(&pool, "kA", "telegram"), Some(1));
    }

    #[test]
    fn platform_match_is_last_resort() {
        let pool = candidates(&[("kA", "wechat"), ("kB", "qq")]);
        assert_eq!(best_match(&pool, "kZ", "qq"), Some(1));
    }

    #[test]
    fn no_match_returns_none() {
        let pool = candidates(&[("kA", "wechat"), ("kB", "qq")]);
        assert_eq!(best_match(&pool, "kZ", "telegram"), None);
    }

    #[test]
    fn empty_pool_returns_none() {
        assert_eq!(best_match(&[], "kA", "wechat"), None);
    }

    #[test]
    fn earliest_added_breaks_api_key_ties() {
        let pool = candidates(&[("kA", "wechat"), ("kA", "qq")]);
        // Neither is on telegram; both share the api_key; first wins.
        assert_eq!(best_match(&pool, "kA", "telegram"), Some(0));
    }

    #[test]
    fn earliest_added_breaks_platform_ties() {
        let pool = candidates(&[("kA", "wechat"), ("kB", "wechat")]);
        assert_eq!(best_match(&pool, "kZ", "wechat"), Some(0));
    }

    #[test]
    fn exact_match_priority_holds_for_all_orderings() {
        // Small exhaustive pool: whenever an exact match exists
        // it is chosen; else an api_key match if one exists; else a
        // platform match if one exists; else none.
        let keys = ["kA", "kB"];
        let platforms = ["p1", "p2"];
        let coords: Vec<(&str, &str)> = keys
            .iter()
            .flat_map(|k| platforms.iter().map(move |p| (*k, *p)))
            .collect();

        for target_key in ["kA", "kB", "kZ"] {
            for target_platform in ["p1", "p2", "p3"] {
                let pool = candidates(&coords);
                let chosen = best_match(&pool, target_key, target_platform);
                let has_exact = coords
                    .iter()
                    .any(|(k, p)| *k == target_key && *p == target_platform);
                let has_key = coords.iter().any(|(k, _)| *k == target_key);
                let has_platform = coords.iter().any(|(_, p)| *p == target_platform);

                match chosen {
                    Some(i) => {
                        let (k, p) = coords[i];
                        if has_exact {
                            assert_eq!((k, p), (target_key, target_platform));
                        } else if has_key {
                            assert_eq!(k, target_key);
                        } else {
                            assert!(has_platform);
                            assert_eq!(p, target_platform);
                        }
                    }
                    None => {
                        assert!(!has_exact && !has_key && !has_platform);
                    }
                }
            }
        }
    }
}
