/// Check a sender against a channel's `allowFrom` list.
///
/// `None` means unrestricted. `Some(&[])` allows nobody. Entries are matched
/// case-insensitively and may use `*` as a wildcard.
pub fn is_sender_allowed(sender_id: &str, allow_from: Option<&[String]>) -> bool {
    let Some(allowlist) = allow_from else {
        return true;
    };
    let sender = sender_id.to_lowercase();
    allowlist.iter().any(|pattern| {
        let pat = pattern.to_lowercase();
        if pat.contains('*') {
            glob_match(&pat, &sender)
        } else {
            pat == sender
        }
    })
}

/// `*` matches any run of characters, including none. The first segment is
/// anchored at the start, the last at the end, and the middle segments are
/// found left to right in what remains between them.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(head) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(head) else {
        return false;
    };
    let mut middle: Vec<&str> = parts.collect();
    let Some(tail) = middle.pop() else {
        return rest.is_empty();
    };
    let Some(body) = rest.strip_suffix(tail) else {
        return false;
    };
    rest = body;
    for part in middle.into_iter().filter(|p| !p.is_empty()) {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn absent_list_allows_everyone() {
        assert!(is_sender_allowed("anyone", None));
    }

    #[test]
    fn empty_list_allows_nobody() {
        assert!(!is_sender_allowed("anyone", Some(&[])));
    }

    #[rstest]
    #[case("alice", true)]
    #[case("Alice", true)]
    #[case("charlie", false)]
    fn exact_match(#[case] sender: &str, #[case] allowed: bool) {
        let list = list(&["alice", "bob"]);
        assert_eq!(is_sender_allowed(sender, Some(&list)), allowed);
    }

    #[rstest]
    #[case("admin_*", "admin_alice", true)]
    #[case("admin_*", "user_bob", false)]
    #[case("*@example.com", "user@example.com", true)]
    #[case("*@example.com", "user@other.com", false)]
    #[case("user_*_admin", "user_123_admin", true)]
    #[case("user_*_admin", "user_123_mod", false)]
    #[case("*_admin", "x_admin_y_admin", true)]
    #[case("*_admin", "x_admin_y", false)]
    #[case("a*b*a", "aba", true)]
    #[case("ab*ba", "aba", false)]
    #[case("*", "anyone", true)]
    fn glob_patterns(#[case] pattern: &str, #[case] sender: &str, #[case] allowed: bool) {
        let list = list(&[pattern]);
        assert_eq!(is_sender_allowed(sender, Some(&list)), allowed);
    }
}
