use std::sync::OnceLock;

use regex::Regex;

use crate::evaluator::{evaluate, format_number, is_allowed_char};
use crate::scientific::find_call_expression;
use crate::units::find_conversions;

/// One step of the ordered rule chain. Returning `None` passes the text on to
/// the next matcher.
pub trait RuleMatcher: Send + Sync {
    fn name(&self) -> &'static str;
    fn answer(&self, text: &str) -> Option<String>;
}

/// A reply together with the matcher that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleAnswer {
    pub matcher: &'static str,
    pub text: String,
}

/// Deterministic offline responder. Matchers run strictly in insertion order
/// and the first non-empty answer wins.
pub struct RuleEngine {
    matchers: Vec<Box<dyn RuleMatcher>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_matchers(vec![
            Box::new(HelpMatcher),
            Box::new(ScientificMatcher),
            Box::new(ArithmeticMatcher),
            Box::new(UnitConversionMatcher),
            Box::new(SmallTalkMatcher),
            Box::new(ScriptMatcher),
            Box::new(GenericMatcher),
        ])
    }
}

impl RuleEngine {
    pub fn with_matchers(matchers: Vec<Box<dyn RuleMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn matcher_names(&self) -> Vec<&'static str> {
        self.matchers.iter().map(|matcher| matcher.name()).collect()
    }

    pub fn answer(&self, text: &str) -> RuleAnswer {
        for matcher in &self.matchers {
            if let Some(answer) = matcher.answer(text) {
                if answer.trim().is_empty() {
                    continue;
                }
                tracing::debug!(matcher = matcher.name(), "rule matcher answered");
                return RuleAnswer {
                    matcher: matcher.name(),
                    text: answer,
                };
            }
        }
        RuleAnswer {
            matcher: GenericMatcher.name(),
            text: generic_reply(text),
        }
    }

    pub fn respond(&self, text: &str) -> String {
        self.answer(text).text
    }
}

fn contains_cjk(text: &str) -> bool {
    text.chars().any(|ch| script_of(ch) == Some(Script::Han))
}

struct HelpMatcher;

impl RuleMatcher for HelpMatcher {
    fn name(&self) -> &'static str {
        "help"
    }

    fn answer(&self, text: &str) -> Option<String> {
        let normalized = text.trim().trim_start_matches('/').to_lowercase();
        let is_help = matches!(
            normalized.as_str(),
            "help" | "start" | "commands" | "what can you do" | "what can you do?"
        ) || normalized.contains("幫助")
            || normalized.contains("帮助")
            || normalized.contains("說明");
        if !is_help {
            return None;
        }
        if contains_cjk(text) {
            return Some(
                "我目前以離線模式運作，可以：\n\
                 • 計算算式，例如 2 * (3 + 4)\n\
                 • 科學函數，例如 sqrt(16)、log(100)\n\
                 • 單位換算，例如 10 km to miles\n\
                 輸入 /new 可開始新的對話。"
                    .to_string(),
            );
        }
        Some(
            "I'm answering in offline mode. I can:\n\
             • evaluate arithmetic such as 2 * (3 + 4)\n\
             • apply sqrt, sin, cos, tan, log, ln, exp, abs and factorial, e.g. sqrt(16)\n\
             • convert units, e.g. 10 km to miles or 100 C to F\n\
             Send /new to start a fresh conversation."
                .to_string(),
        )
    }
}

struct ScientificMatcher;

impl RuleMatcher for ScientificMatcher {
    fn name(&self) -> &'static str {
        "scientific"
    }

    fn answer(&self, text: &str) -> Option<String> {
        let expression = find_call_expression(text)?;
        if !expression.is_bare_call() {
            match evaluate(&expression.substituted) {
                Ok(value) => {
                    return Some(format!("{} = {}", expression.literal, format_number(value)));
                }
                Err(error) => tracing::debug!(%error, "expression around function call rejected"),
            }
        }
        Some(format!(
            "{} = {}",
            expression.call.literal,
            format_number(expression.value)
        ))
    }
}

struct ArithmeticMatcher;

fn date_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\d{4}-\d{1,2}-\d{1,2}").ok())
        .as_ref()
}

/// Longest run of allowed characters that contains a digit followed later by
/// a binary operator.
fn arithmetic_candidate(text: &str) -> Option<String> {
    let mut best: Option<String> = None;
    let mut current = String::new();
    for ch in text.chars().chain(std::iter::once('\u{0}')) {
        if is_allowed_char(ch) {
            current.push(ch);
            continue;
        }
        let candidate = current.trim().to_string();
        current.clear();
        if !has_binary_operator(&candidate) {
            continue;
        }
        if date_pattern().is_some_and(|pattern| pattern.is_match(&candidate)) {
            continue;
        }
        if best
            .as_ref()
            .map_or(true, |existing| candidate.len() > existing.len())
        {
            best = Some(candidate);
        }
    }
    best
}

fn has_binary_operator(candidate: &str) -> bool {
    let mut previous: Option<char> = None;
    for ch in candidate.chars().filter(|ch| !ch.is_whitespace()) {
        if "+-*/%^".contains(ch)
            && previous.is_some_and(|prev| prev.is_ascii_digit() || prev == ')' || prev == '.')
        {
            return true;
        }
        previous = Some(ch);
    }
    false
}

impl RuleMatcher for ArithmeticMatcher {
    fn name(&self) -> &'static str {
        "arithmetic"
    }

    fn answer(&self, text: &str) -> Option<String> {
        let candidate = arithmetic_candidate(text)?;
        match evaluate(&candidate) {
            Ok(value) => Some(format!("{candidate} = {}", format_number(value))),
            Err(error) => {
                tracing::debug!(%error, "arithmetic candidate rejected");
                None
            }
        }
    }
}

struct UnitConversionMatcher;

impl RuleMatcher for UnitConversionMatcher {
    fn name(&self) -> &'static str {
        "unit_conversion"
    }

    fn answer(&self, text: &str) -> Option<String> {
        let lines: Vec<String> = find_conversions(text)
            .into_iter()
            .map(|conversion| {
                format!(
                    "{} {} = {} {}",
                    format_number(conversion.amount),
                    conversion.from_symbol,
                    format_number(conversion.result),
                    conversion.to_symbol
                )
            })
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}

struct SmallTalkMatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmallTalk {
    Greeting,
    Farewell,
    Thanks,
}

fn english_small_talk() -> Option<&'static [(SmallTalk, Regex)]> {
    static PATTERNS: OnceLock<Option<Vec<(SmallTalk, Regex)>>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(vec![
                (
                    SmallTalk::Thanks,
                    Regex::new(r"(?i)\b(thanks|thank you|thx|cheers)\b").ok()?,
                ),
                (
                    SmallTalk::Farewell,
                    Regex::new(r"(?i)\b(bye|goodbye|good night|see you|farewell)\b").ok()?,
                ),
                (
                    SmallTalk::Greeting,
                    Regex::new(r"(?i)\b(hello|hi|hey|good morning|good afternoon|good evening|greetings)\b")
                        .ok()?,
                ),
            ])
        })
        .as_deref()
}

const CJK_SMALL_TALK: &[(SmallTalk, &[&str])] = &[
    (SmallTalk::Thanks, &["謝謝", "谢谢", "感謝", "感谢", "多謝"]),
    (SmallTalk::Farewell, &["再見", "再见", "拜拜", "晚安"]),
    (SmallTalk::Greeting, &["你好", "您好", "哈囉", "嗨", "早安", "午安"]),
];

fn classify_small_talk(text: &str) -> Option<SmallTalk> {
    for (kind, words) in CJK_SMALL_TALK {
        if words.iter().any(|word| text.contains(word)) {
            return Some(*kind);
        }
    }
    english_small_talk()?
        .iter()
        .find(|(_, pattern)| pattern.is_match(text))
        .map(|(kind, _)| *kind)
}

impl RuleMatcher for SmallTalkMatcher {
    fn name(&self) -> &'static str {
        "small_talk"
    }

    fn answer(&self, text: &str) -> Option<String> {
        let kind = classify_small_talk(text)?;
        let reply = match (kind, contains_cjk(text)) {
            (SmallTalk::Greeting, false) => {
                "Hello! I'm in offline mode right now, but I can still do math and unit conversions."
            }
            (SmallTalk::Greeting, true) => "你好！我目前處於離線模式，但仍可以幫你計算與換算單位。",
            (SmallTalk::Farewell, false) => "Goodbye! Come back any time.",
            (SmallTalk::Farewell, true) => "再見！隨時歡迎回來。",
            (SmallTalk::Thanks, false) => "You're welcome!",
            (SmallTalk::Thanks, true) => "不客氣！",
        };
        Some(reply.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Han,
    Kana,
    Hangul,
    Cyrillic,
    Arabic,
    Thai,
}

fn script_of(ch: char) -> Option<Script> {
    match ch as u32 {
        0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF => Some(Script::Han),
        0x3040..=0x30FF => Some(Script::Kana),
        0xAC00..=0xD7AF | 0x1100..=0x11FF => Some(Script::Hangul),
        0x0400..=0x04FF => Some(Script::Cyrillic),
        0x0600..=0x06FF => Some(Script::Arabic),
        0x0E00..=0x0E7F => Some(Script::Thai),
        _ => None,
    }
}

/// Dominant non-Latin script. Any kana marks the text as Japanese even when
/// kanji outnumber it.
fn dominant_script(text: &str) -> Option<Script> {
    let mut counts = [0_usize; 6];
    for script in text.chars().filter_map(script_of) {
        counts[script as usize] += 1;
    }
    if counts[Script::Kana as usize] > 0 {
        return Some(Script::Kana);
    }
    let (index, count) = counts
        .iter()
        .enumerate()
        .max_by_key(|(_, count)| **count)?;
    if *count == 0 {
        return None;
    }
    [
        Script::Han,
        Script::Kana,
        Script::Hangul,
        Script::Cyrillic,
        Script::Arabic,
        Script::Thai,
    ]
    .get(index)
    .copied()
}

struct ScriptMatcher;

impl RuleMatcher for ScriptMatcher {
    fn name(&self) -> &'static str {
        "language_script"
    }

    fn answer(&self, text: &str) -> Option<String> {
        let reply = match dominant_script(text)? {
            Script::Han => "我目前處於離線模式，無法回答這個問題。可以試試計算，例如 2 + 3，或輸入 help 查看功能。",
            Script::Kana => "現在オフラインモードです。計算（例: 2 + 3）や単位変換（例: 10 km to miles）はできます。",
            Script::Hangul => "현재 오프라인 모드입니다. 계산(예: 2 + 3)이나 단위 변환(예: 10 km to miles)은 가능합니다.",
            Script::Cyrillic => "Сейчас я работаю в автономном режиме. Могу посчитать (например, 2 + 3) или перевести единицы (10 km to miles).",
            Script::Arabic => "أعمل حاليًا في وضع عدم الاتصال. يمكنني إجراء العمليات الحسابية مثل 2 + 3 وتحويل الوحدات.",
            Script::Thai => "ขณะนี้ทำงานแบบออฟไลน์ สามารถคำนวณ เช่น 2 + 3 และแปลงหน่วยได้",
        };
        Some(reply.to_string())
    }
}

struct GenericMatcher;

fn generic_reply(text: &str) -> String {
    let preview: String = text.trim().chars().take(80).collect();
    if preview.is_empty() {
        return "I'm in offline mode. Send help to see what I can do.".to_string();
    }
    format!(
        "I'm in offline mode and can't answer \"{preview}\" right now. \
         Try arithmetic like 2 * (3 + 4), sqrt(16), or a conversion like 10 km to miles. \
         Send help for more."
    )
}

impl RuleMatcher for GenericMatcher {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn answer(&self, text: &str) -> Option<String> {
        Some(generic_reply(text))
    }
}
