//! Minimal glob matching for dotted log tags (`core.*`, `http.req?`).
//! Only `*` (any run of characters) and `?` (single character) are
//! supported; there is no character-class syntax because tags are plain
//! `[a-z0-9_.]` strings and never need one.

pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    match_from(&p, &t, 0, 0)
}

fn match_from(p: &[char], t: &[char], pi: usize, ti: usize) -> bool {
    if pi == p.len() {
        return ti == t.len();
    }
    match p[pi] {
        '*' => {
            // Try consuming zero or more characters of `t`.
            for k in ti..=t.len() {
                if match_from(p, t, pi + 1, k) {
                    return true;
                }
            }
            false
        }
        '?' => ti < t.len() && match_from(p, t, pi + 1, ti + 1),
        c => ti < t.len() && t[ti] == c && match_from(p, t, pi + 1, ti + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_any_suffix() {
        assert!(glob_match("core.*", "core.error"));
        assert!(glob_match("core.*", "core."));
        assert!(!glob_match("core.*", "http.error"));
    }

    #[test]
    fn question_matches_exactly_one_char() {
        assert!(glob_match("http.req?", "http.req1"));
        assert!(!glob_match("http.req?", "http.req"));
        assert!(!glob_match("http.req?", "http.req12"));
    }

    #[test]
    fn exact_match_with_no_wildcards() {
        assert!(glob_match("core.error", "core.error"));
        assert!(!glob_match("core.error", "core.errors"));
    }
}
