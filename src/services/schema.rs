//! 补全服务返回内容的预期结构
//!
//! 所有结构化响应都在这里解析成强类型候选；不符合结构的整条响应被拒绝。

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ParseError;
use crate::models::{Letter, LetterSet, PropositionCandidate, QuestionCandidate};

/// 去掉 ```json 代码块包裹
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 题号：接受整数或数字字符串
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Int(i64),
    Text(String),
}

impl NumberLike {
    fn value(&self) -> Option<u32> {
        match self {
            NumberLike::Int(n) => u32::try_from(*n).ok().filter(|n| *n > 0),
            NumberLike::Text(s) => s
                .trim()
                .trim_start_matches(['Q', 'q'])
                .trim()
                .parse()
                .ok()
                .filter(|n| *n > 0),
        }
    }
}

// ========== 题目抽取 ==========

#[derive(Debug, Deserialize)]
struct QuestionItem {
    #[serde(alias = "numero", alias = "num")]
    number: NumberLike,
    #[serde(alias = "contenu", alias = "text", alias = "texte")]
    body: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionPayload {
    Wrapped {
        questions: Vec<QuestionPayload>,
        #[serde(default, alias = "gaps", alias = "trous", alias = "numeros_manquants")]
        suspected_gaps: Vec<NumberLike>,
    },
    Item(QuestionItem),
    List(Vec<QuestionPayload>),
}

/// 题目抽取结果
#[derive(Debug, Default, PartialEq, Eq)]
pub struct QuestionResponse {
    pub candidates: Vec<QuestionCandidate>,
    /// 服务自己报告的可疑缺号
    pub suspected_gaps: Vec<u32>,
}

impl QuestionPayload {
    fn flatten(self, out: &mut QuestionResponse) {
        match self {
            QuestionPayload::Wrapped {
                questions,
                suspected_gaps,
            } => {
                out.suspected_gaps
                    .extend(suspected_gaps.iter().filter_map(NumberLike::value));
                for q in questions {
                    q.flatten(out);
                }
            }
            QuestionPayload::List(items) => {
                for q in items {
                    q.flatten(out);
                }
            }
            QuestionPayload::Item(item) => {
                let body = item.body.trim();
                if let (Some(number), false) = (item.number.value(), body.is_empty()) {
                    out.candidates.push(QuestionCandidate::new(number, body));
                }
            }
        }
    }
}

/// 解析题目抽取响应
///
/// 接受 `{"questions": [...]}`、裸列表，以及 `[{"questions": [...]}]` 这种嵌套形式。
pub fn parse_questions(raw: &str) -> Result<QuestionResponse, ParseError> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))?;
    if !(value.is_array() || value.get("questions").is_some()) {
        return Err(ParseError::Shape("缺少 questions 列表".to_string()));
    }
    let payload: QuestionPayload = serde_json::from_value(value)?;
    let mut out = QuestionResponse::default();
    payload.flatten(&mut out);
    Ok(out)
}

// ========== 选项抽取 ==========

#[derive(Debug, Deserialize)]
struct PropositionItem {
    #[serde(
        alias = "numero_question_sur_page",
        alias = "numero_question",
        alias = "numero",
        alias = "question"
    )]
    number: NumberLike,
    #[serde(alias = "options")]
    propositions: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Deserialize)]
struct PropositionPayload {
    #[serde(alias = "questions_propositions", alias = "questions")]
    propositions: Vec<PropositionItem>,
}

/// 解析选项抽取响应
///
/// 只保留 A–E 的非空文本；其余字母直接忽略。
pub fn parse_propositions(raw: &str) -> Result<Vec<PropositionCandidate>, ParseError> {
    let payload: PropositionPayload = serde_json::from_str(strip_code_fence(raw))?;
    let mut out = Vec::with_capacity(payload.propositions.len());
    for item in payload.propositions {
        let Some(number) = item.number.value() else {
            continue;
        };
        let mut candidate = PropositionCandidate::new(number);
        let options: BTreeMap<Letter, String> = item
            .propositions
            .into_iter()
            .filter_map(|(key, text)| Some((key.parse::<Letter>().ok()?, text?)))
            .collect();
        candidate.absorb(&options);
        if !candidate.options.is_empty() {
            out.push(candidate);
        }
    }
    Ok(out)
}

// ========== 答案 ==========

/// 字母列表：接受 `["A","C"]` 或 `"A, C"` / `"AC"`
fn letters_from_value(value: &Value) -> Result<LetterSet, ParseError> {
    let tokens: Vec<String> = match value {
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ParseError::Letters(value.to_string()))?,
        Value::String(s) => s
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_string())
            .collect(),
        _ => return Err(ParseError::Letters(value.to_string())),
    };

    let mut set = LetterSet::new();
    for token in &tokens {
        let letter = token
            .parse::<Letter>()
            .map_err(|_| ParseError::Letters(token.clone()))?;
        set.insert(letter);
    }
    if !set.is_plausible() {
        return Err(ParseError::Letters(format!("{} 个字母", set.len())));
    }
    Ok(set)
}

#[derive(Debug, Deserialize)]
struct AnswerPayload {
    #[serde(default, alias = "numero", alias = "question")]
    question_num: Option<NumberLike>,
    #[serde(alias = "reponses", alias = "answers", alias = "correct")]
    correct_answers: Value,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default)]
    explanation: Option<String>,
}

/// 逐题问答 / 读图的答案
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerResponse {
    pub question_num: Option<u32>,
    pub letters: LetterSet,
    pub confidence: Option<f64>,
    pub explanation: Option<String>,
}

/// 解析答案响应
///
/// JSON 对象优先；不是 JSON 时只接受形如 "A, C" 的纯字母回答。
pub fn parse_answer(raw: &str) -> Result<AnswerResponse, ParseError> {
    let cleaned = strip_code_fence(raw);
    match serde_json::from_str::<AnswerPayload>(cleaned) {
        Ok(payload) => {
            let letters = letters_from_value(&payload.correct_answers)?;
            let confidence = payload.confidence.and_then(|c| match c {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim_end_matches('%').trim().parse().ok(),
                _ => None,
            });
            Ok(AnswerResponse {
                question_num: payload.question_num.as_ref().and_then(NumberLike::value),
                letters,
                confidence,
                explanation: payload.explanation,
            })
        }
        Err(err) => {
            let is_letter_list = !cleaned.is_empty()
                && cleaned
                    .chars()
                    .all(|c| c.is_ascii_alphabetic() || c == ',' || c.is_whitespace())
                && cleaned
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|t| !t.is_empty())
                    .all(|t| t.len() == 1);
            if !is_letter_list {
                return Err(ParseError::Json(err));
            }
            Ok(AnswerResponse {
                question_num: None,
                letters: letters_from_value(&Value::String(cleaned.to_string()))?,
                confidence: None,
                explanation: None,
            })
        }
    }
}
