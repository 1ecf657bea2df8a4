//! Moderation scanner: a lightweight keyword filter over completed
//! exchanges. Advisory only: it logs, it never withholds a reply.

use regex::Regex;

/// Policy categories and the phrases that trigger them. Extend as needed.
const POLICY_RULES: &[(&str, &[&str])] = &[
    (
        "self-harm",
        &[
            "suicide",
            "self-harm",
            "kill myself",
            "end my life",
            "want to die",
        ],
    ),
    ("abuse", &["abuse", "molest", "assault"]),
    ("profanity", &["fuck you", "go to hell"]),
    (
        "medical-misinformation",
        &["stop taking your medication", "don't see a doctor"],
    ),
];

struct PolicyRule {
    category: &'static str,
    pattern: Regex,
}

/// Scans `(message, response)` pairs against the fixed policy rule set.
/// Patterns are compiled once at construction.
pub struct ModerationScanner {
    rules: Vec<PolicyRule>,
}

impl ModerationScanner {
    pub fn new() -> Self {
        let rules = POLICY_RULES
            .iter()
            .map(|(category, phrases)| {
                let alternation = phrases
                    .iter()
                    .map(|p| regex::escape(p))
                    .collect::<Vec<_>>()
                    .join("|");
                PolicyRule {
                    category,
                    // The phrase list is static and escaped, so this
                    // compile cannot fail at runtime.
                    pattern: Regex::new(&format!("(?i){}", alternation))
                        .unwrap_or_else(|_| Regex::new("$^").unwrap()),
                }
            })
            .collect();

        Self { rules }
    }

    /// Returns a reason code string when the exchange violates policy,
    /// `None` when it is clean. Reason codes name the matched source and
    /// category only, never the matched text.
    pub fn scan(&self, message: &str, response: &str) -> Option<String> {
        let mut reasons = Vec::new();

        for rule in &self.rules {
            if rule.pattern.is_match(message) {
                reasons.push(format!("message:{}", rule.category));
            }
            if rule.pattern.is_match(response) {
                reasons.push(format!("response:{}", rule.category));
            }
        }

        if reasons.is_empty() {
            None
        } else {
            Some(reasons.join("; "))
        }
    }
}

impl Default for ModerationScanner {
    fn default() -> Self {
        Self::new()
    }
}
