//! Regional and global rankings.

use crate::model::UserProfile;
use regex::Regex;
use std::cmp::Ordering;

/// Number of entries in each ranking snapshot
pub const LEADERBOARD_LIMIT: usize = 10;

/// Which users a ranking covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Global,
    /// Region pattern with `ilike` semantics: case-insensitive, `%` matches
    /// any run of characters, `_` exactly one
    Regional(String),
}

impl Scope {
    pub fn label(&self) -> String {
        match self {
            Scope::Global => "global".to_string(),
            Scope::Regional(region) => format!("region {}", region),
        }
    }
}

/// Ranking order: higher level first, then higher experience
pub fn rank_order(a: &UserProfile, b: &UserProfile) -> Ordering {
    b.level.cmp(&a.level).then_with(|| b.exp.cmp(&a.exp))
}

/// True if `entries` are non-increasing in level, then experience
pub fn is_ranked(entries: &[UserProfile]) -> bool {
    entries
        .windows(2)
        .all(|w| rank_order(&w[0], &w[1]) != Ordering::Greater)
}

/// Compile an `ilike` pattern into an anchored case-insensitive regex.
/// A backslash makes the next character literal. `None` only when the
/// pattern exceeds the regex size limit.
pub fn region_pattern(pattern: &str) -> Option<Regex> {
    let mut re = String::from("(?is)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            '\\' => {
                if let Some(next) = chars.next() {
                    re.push_str(&regex::escape(&next.to_string()));
                }
            }
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).ok()
}

/// Filter, order and truncate `profiles` the way the profile store does
pub fn rank(
    profiles: impl IntoIterator<Item = UserProfile>,
    scope: &Scope,
    limit: usize,
) -> Vec<UserProfile> {
    let mut entries: Vec<UserProfile> = match scope {
        Scope::Global => profiles.into_iter().collect(),
        Scope::Regional(pattern) => match region_pattern(pattern) {
            Some(re) => profiles
                .into_iter()
                .filter(|p| re.is_match(&p.region))
                .collect(),
            None => Vec::new(),
        },
    };
    entries.sort_by(rank_order);
    entries.truncate(limit);
    entries
}

/// Both ranking snapshots held by a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Leaderboards {
    pub regional: Vec<UserProfile>,
    pub global: Vec<UserProfile>,
}

/// One rendered ranking line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub rank: usize,
    pub name: String,
    pub region: String,
    pub level: i64,
    pub exp: i64,
    pub is_you: bool,
}

pub fn rows(entries: &[UserProfile], current_user: Option<&str>) -> Vec<Row> {
    entries
        .iter()
        .enumerate()
        .map(|(i, p)| Row {
            rank: i + 1,
            name: p.name.clone(),
            region: p.region.clone(),
            level: p.level,
            exp: p.exp,
            is_you: current_user == Some(p.id.as_str()),
        })
        .collect()
}

pub fn render(title: &str, entries: &[UserProfile], current_user: Option<&str>) -> String {
    let mut out = format!("{}\n", title);
    if entries.is_empty() {
        out.push_str("  No records found.\n");
        return out;
    }
    for row in rows(entries, current_user) {
        out.push_str(&format!(
            "  {:>2}. {}{} ({}) - Level {} ({} XP)\n",
            row.rank,
            row.name,
            if row.is_you { " (You)" } else { "" },
            row.region,
            row.level,
            group_thousands(row.exp)
        ));
    }
    out
}

fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, region: &str, level: i64, exp: i64) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: format!("{}@example.com", id),
            image: String::new(),
            region: region.to_string(),
            exp,
            level,
            total_disposal: 0,
        }
    }

    #[test]
    fn test_rank_orders_by_level_then_exp() {
        let ranked = rank(
            vec![
                user("a", "Taipei", 2, 10),
                user("b", "Taipei", 3, 0),
                user("c", "Taipei", 2, 90),
            ],
            &Scope::Global,
            LEADERBOARD_LIMIT,
        );
        let ids: Vec<_> = ranked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert!(is_ranked(&ranked));
    }

    #[test]
    fn test_rank_limits_to_ten() {
        let users = (0..25).map(|i| user(&format!("u{}", i), "X", 1, i));
        let ranked = rank(users, &Scope::Global, LEADERBOARD_LIMIT);
        assert_eq!(ranked.len(), 10);
        assert_eq!(ranked[0].exp, 24);
        assert!(is_ranked(&ranked));
    }

    #[test]
    fn test_is_ranked_detects_disorder() {
        assert!(!is_ranked(&[user("a", "X", 1, 50), user("b", "X", 1, 60)]));
        assert!(!is_ranked(&[user("a", "X", 1, 50), user("b", "X", 2, 0)]));
        assert!(is_ranked(&[user("a", "X", 1, 50), user("b", "X", 1, 50)]));
        assert!(is_ranked(&[]));
    }

    #[test]
    fn test_regional_scope_is_case_insensitive() {
        let ranked = rank(
            vec![
                user("a", "Taipei", 1, 0),
                user("b", "TAIPEI", 1, 5),
                user("c", "Tainan", 9, 0),
            ],
            &Scope::Regional("taipei".to_string()),
            LEADERBOARD_LIMIT,
        );
        let ids: Vec<_> = ranked.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_region_pattern_wildcards() {
        assert!(region_pattern("tai%").unwrap().is_match("Taipei"));
        assert!(region_pattern("tai%").unwrap().is_match("Tainan"));
        assert!(region_pattern("t_ipei").unwrap().is_match("Taipei"));
        assert!(!region_pattern("t_pei").unwrap().is_match("Taipei"));
        assert!(region_pattern("New York (NY)").unwrap().is_match("new york (ny)"));
        assert!(region_pattern("100\\%").unwrap().is_match("100%"));
        assert!(!region_pattern("100\\%").unwrap().is_match("1000"));
    }

    #[test]
    fn test_render_marks_current_user() {
        let entries = vec![user("a", "Taipei", 4, 1234), user("b", "Taipei", 1, 0)];
        let out = render("Local Leaderboard", &entries, Some("b"));
        assert!(out.contains(" 1. A (Taipei) - Level 4 (1,234 XP)"));
        assert!(out.contains(" 2. B (You) (Taipei) - Level 1 (0 XP)"));
    }

    #[test]
    fn test_render_empty() {
        let out = render("Global Leaderboard", &[], None);
        assert!(out.contains("No records found."));
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(7890123), "7,890,123");
        assert_eq!(group_thousands(-4500), "-4,500");
    }
}
