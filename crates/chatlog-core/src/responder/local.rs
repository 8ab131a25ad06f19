//! Local deterministic responder

use std::sync::LazyLock;

use regex::Regex;

/// Synchronous, infallible text-in/text-out responder
pub trait LocalResponder: Send + Sync {
    fn respond(&self, text: &str) -> String;
}

struct Rule {
    pattern: Regex,
    /// `{0}` is replaced by the reflected capture
    templates: &'static [&'static str],
}

const RULE_SOURCES: &[(&str, &[&str])] = &[
    (
        r"(?i)^\s*(?:hello|hi|hey|greetings)\b",
        &[
            "Hello. How are you feeling today?",
            "Hi there. What would you like to talk about?",
        ],
    ),
    (
        r"(?i)\bi need (.+)",
        &[
            "Why do you need {0}?",
            "Would it really help you to get {0}?",
            "Are you sure you need {0}?",
        ],
    ),
    (
        r"(?i)\bwhy don'?t you ([^?]+)\??",
        &[
            "Do you really think I don't {0}?",
            "Perhaps eventually I will {0}.",
        ],
    ),
    (
        r"(?i)\bi can'?t (.+)",
        &[
            "How do you know you can't {0}?",
            "Perhaps you could {0} if you tried.",
        ],
    ),
    (
        r"(?i)\bi am (.+)",
        &[
            "Did you come to me because you are {0}?",
            "How long have you been {0}?",
            "How do you feel about being {0}?",
        ],
    ),
    (
        r"(?i)\bi'?m (.+)",
        &[
            "How does being {0} make you feel?",
            "Why do you tell me you're {0}?",
        ],
    ),
    (
        r"(?i)\bi feel (.+)",
        &[
            "Tell me more about feeling {0}.",
            "Do you often feel {0}?",
        ],
    ),
    (
        r"(?i)\bare you ([^?]+)\??",
        &[
            "Why does it matter whether I am {0}?",
            "Perhaps you believe I am {0}.",
        ],
    ),
    (
        r"(?i)\bbecause (.+)",
        &[
            "Is that the real reason?",
            "If {0}, what else must be true?",
        ],
    ),
    (
        r"(?i)\b(?:mother|father|family|brother|sister)\b",
        &[
            "Tell me more about your family.",
            "How do you get along with your family?",
        ],
    ),
    (
        r"(?i)\bsorry\b",
        &["There are many times when no apology is needed."],
    ),
    (
        r"(?i)\b(?:bye|goodbye|quit)\b",
        &["Thank you for talking to me.", "Goodbye. It was nice talking to you."],
    ),
    (
        r"\?\s*$",
        &[
            "Why do you ask that?",
            "What do you think?",
            "Please consider whether you can answer your own question.",
        ],
    ),
];

const DEFAULT_REPLIES: &[&str] = &[
    "Please tell me more.",
    "Let's change focus a bit... Tell me about your family.",
    "Can you elaborate on that?",
    "I see. And what does that tell you?",
    "How does that make you feel?",
];

const REFLECTIONS: &[(&str, &str)] = &[
    ("i", "you"),
    ("i'm", "you are"),
    ("i'd", "you would"),
    ("i've", "you have"),
    ("i'll", "you will"),
    ("am", "are"),
    ("was", "were"),
    ("my", "your"),
    ("me", "you"),
    ("myself", "yourself"),
    ("you", "I"),
    ("you're", "I am"),
    ("you've", "I have"),
    ("your", "my"),
    ("yours", "mine"),
    ("are", "am"),
];

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    RULE_SOURCES
        .iter()
        .map(|&(source, templates)| Rule {
            pattern: Regex::new(source).expect("built-in rule pattern is valid"),
            templates,
        })
        .collect()
});

/// Keyword-rule responder in the style of ELIZA.
///
/// The first matching rule wins; the template is picked by a stable hash of
/// the input, so the same text always yields the same reply.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElizaResponder;

impl ElizaResponder {
    pub fn new() -> Self {
        Self
    }
}

impl LocalResponder for ElizaResponder {
    fn respond(&self, text: &str) -> String {
        let text = text.trim();
        let seed = stable_hash(&text.to_lowercase());

        for rule in RULES.iter() {
            if let Some(captures) = rule.pattern.captures(text) {
                let template = pick(rule.templates, seed);
                let fragment = captures
                    .get(1)
                    .map(|m| reflect(m.as_str()))
                    .unwrap_or_default();
                return template.replace("{0}", &fragment);
            }
        }

        pick(DEFAULT_REPLIES, seed).to_string()
    }
}

/// Swap first and second person in a captured fragment
fn reflect(fragment: &str) -> String {
    fragment
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .split_whitespace()
        .map(|word| {
            let lower = word.to_lowercase();
            REFLECTIONS
                .iter()
                .find(|(from, _)| *from == lower)
                .map(|(_, to)| (*to).to_string())
                .unwrap_or_else(|| word.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn pick<'a>(options: &[&'a str], seed: u64) -> &'a str {
    // options is never empty for built-in tables
    options[(seed % options.len() as u64) as usize]
}

/// FNV-1a
fn stable_hash(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}
