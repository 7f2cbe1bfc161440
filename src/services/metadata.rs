//! 文档元数据 - 业务能力层
//!
//! 用首页文本问出类型、学年和教学单元；问不出来的字段从文件名推断。

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::infrastructure::{CompletionRequest, FetchedSource, ModelTier};
use crate::models::DocumentMeta;
use crate::services::caller::ServiceCaller;

/// 发送给服务的首页文本长度（字符）
const HEAD_CHARS: usize = 1000;

const UNKNOWN_TYPE: &str = "Unknown";

static REPLY_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^[\s*\-]*(TYPE|ANN[EÉ]E|UE)\s*:\s*(.*?)\s*$").expect("元数据正则无效")
});

static YEAR_RANGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{4})\s*[/\-–]\s*(\d{4})").expect("学年正则无效")
});

static UNIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUE\s*-?\s*(\d{1,2})\b").expect("单元正则无效"));

/// 推断出的元数据字段
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaHints {
    pub doc_type: Option<String>,
    pub unit: Option<String>,
    pub year: Option<String>,
}

impl MetaHints {
    /// 用另一组字段补齐缺失项
    pub fn or(self, fallback: MetaHints) -> MetaHints {
        MetaHints {
            doc_type: self.doc_type.or(fallback.doc_type),
            unit: self.unit.or(fallback.unit),
            year: self.year.or(fallback.year),
        }
    }
}

/// 占位或空值视为没有
fn meaningful(value: &str) -> Option<&str> {
    let value = value.trim().trim_matches(['[', ']', '"', '\'']).trim();
    let lower = value.to_lowercase();
    if value.is_empty()
        || matches!(
            lower.as_str(),
            "unknown" | "inconnu" | "inconnue" | "none" | "null" | "n/a" | "na" | "-" | "type" | "année" | "annee" | "ue"
        )
    {
        None
    } else {
        Some(value)
    }
}

fn normalize_year(value: &str) -> String {
    match YEAR_RANGE.captures(value) {
        Some(caps) => format!("{} / {}", &caps[1], &caps[2]),
        None => value.to_string(),
    }
}

fn normalize_unit(value: &str) -> String {
    match UNIT.captures(value) {
        Some(caps) => format!("UE{}", &caps[1]),
        None => value.to_string(),
    }
}

/// 解析 "TYPE: / ANNEE: / UE:" 形式的回复
pub fn parse_reply(raw: &str) -> MetaHints {
    let mut hints = MetaHints::default();
    for caps in REPLY_FIELD.captures_iter(raw) {
        let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Some(value) = meaningful(value.as_str()) else {
            continue;
        };
        match key.as_str().to_uppercase().as_str() {
            "TYPE" => hints.doc_type = Some(value.to_string()),
            "UE" => hints.unit = Some(normalize_unit(value)),
            _ => hints.year = Some(normalize_year(value)),
        }
    }
    hints
}

/// 从文件名推断，例如 `ue3-correction-cb1-s40-21-22-48479.pdf`
pub fn hints_from_filename(filename: &str) -> MetaHints {
    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
        .to_lowercase();
    let tokens: Vec<&str> = stem
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    let mut hints = MetaHints::default();

    for token in &tokens {
        if let Some(n) = token.strip_prefix("ue").filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())) {
            hints.unit.get_or_insert_with(|| format!("UE{}", n));
        }
        if let Some(n) = token.strip_prefix("cb").filter(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())) {
            hints.doc_type.get_or_insert_with(|| format!("Concours Blanc N°{}", n));
        }
        if let Some(n) = token.strip_prefix("colle") {
            let doc_type = if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) {
                format!("Colle N°{}", n)
            } else {
                "Colle".to_string()
            };
            hints.doc_type.get_or_insert(doc_type);
        }
    }

    // 相邻的两个年份，如 "21-22" 或 "2021-2022"
    for pair in tokens.windows(2) {
        let (Ok(a), Ok(b)) = (pair[0].parse::<u32>(), pair[1].parse::<u32>()) else {
            continue;
        };
        let year = match (pair[0].len(), pair[1].len()) {
            (2, 2) if b == a + 1 => Some(format!("20{:02} / 20{:02}", a, b)),
            (4, 4) if b == a + 1 => Some(format!("{} / {}", a, b)),
            _ => None,
        };
        if year.is_some() {
            hints.year = year;
            break;
        }
    }
    hints
}

pub struct MetadataExtractor<'a> {
    caller: &'a ServiceCaller,
}

impl<'a> MetadataExtractor<'a> {
    pub fn new(caller: &'a ServiceCaller) -> Self {
        Self { caller }
    }

    fn build_prompt(filename: &str, head: &str) -> String {
        format!(
            r#"Tu es un agent spécialisé dans l'analyse de documents PDF de QCM et de corrections.
Exemples :
- pour un fichier 'ue3-correction-cb1-s40-21-22-48479.pdf', le type doit être 'Concours Blanc N°1'
- pour le texte 'SESSION 2021 / 2022', l'année doit être '2021 / 2022'
- pour le texte 'UE2', l'UE doit être 'UE2'

Nom du fichier : {}

Analyse le texte suivant et détermine :
1. le type de document ('Concours Blanc N°1' pour une correction de concours blanc, 'Colle N°1' pour une colle) ;
2. l'année de la session (format 'XXXX / XXXX') ;
3. l'UE (format 'UE1', 'UE2', ...).

Texte à analyser :
{}

Réponds uniquement avec le format suivant, sans autre texte :
TYPE: [type]
ANNEE: [année]
UE: [ue]"#,
            filename, head
        )
    }

    /// 组装文档元数据；服务失败时完全依赖文件名
    pub async fn extract(&self, source: &FetchedSource, text: &str, institution: &str) -> DocumentMeta {
        let head: String = text.chars().take(HEAD_CHARS).collect();
        let call_label = format!("[文档 {}] 元数据", source.stem());
        let request = CompletionRequest::text(
            ModelTier::Standard,
            Self::build_prompt(&source.filename, &head),
        );

        let from_reply = match self.caller.ask(&call_label, request).await {
            Some(raw) => parse_reply(&raw),
            None => MetaHints::default(),
        };
        let from_filename = hints_from_filename(&source.filename);
        debug!("{} 回复: {:?} / 文件名: {:?}", call_label, from_reply, from_filename);

        let hints = from_reply.or(from_filename);
        let meta = DocumentMeta {
            institution: institution.to_string(),
            unit: hints.unit,
            doc_type: hints.doc_type.unwrap_or_else(|| UNKNOWN_TYPE.to_string()),
            year: hints.year,
            filename: source.filename.clone(),
            source_url: source.url.clone(),
        };
        info!("{} → {}", call_label, meta.key());
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCompletion;
    use crate::utils::RetryPolicy;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_hints_from_filename() {
        let hints = hints_from_filename("ue3-correction-cb1-s40-21-22-48479.pdf");
        assert_eq!(hints.unit.as_deref(), Some("UE3"));
        assert_eq!(hints.doc_type.as_deref(), Some("Concours Blanc N°1"));
        assert_eq!(hints.year.as_deref(), Some("2021 / 2022"));

        let colle = hints_from_filename("UE5_colle_2022-2023.pdf");
        assert_eq!(colle.doc_type.as_deref(), Some("Colle"));
        assert_eq!(colle.year.as_deref(), Some("2022 / 2023"));
    }

    #[test]
    fn test_parse_reply_ignores_placeholders() {
        let hints = parse_reply("TYPE: Concours Blanc N°2\nANNEE: 2020/2021\nUE: [ue]");
        assert_eq!(hints.doc_type.as_deref(), Some("Concours Blanc N°2"));
        assert_eq!(hints.year.as_deref(), Some("2020 / 2021"));
        assert_eq!(hints.unit, None);
    }

    #[tokio::test]
    async fn test_reply_wins_and_filename_fills_gaps() {
        let completion = ScriptedCompletion::new().respond("TYPE: Colle N°3\nANNEE: Inconnue\nUE: UE 7");
        let caller = ServiceCaller::new(Arc::new(completion), RetryPolicy::immediate(1), Duration::ZERO);
        let source = FetchedSource {
            url: "https://example.org/ue3-cb1-21-22.pdf".to_string(),
            filename: "ue3-cb1-21-22.pdf".to_string(),
            local_path: PathBuf::from("ue3-cb1-21-22.pdf"),
        };

        let meta = MetadataExtractor::new(&caller).extract(&source, "SESSION", "Université").await;
        assert_eq!(meta.doc_type, "Colle N°3");
        assert_eq!(meta.unit.as_deref(), Some("UE7"));
        assert_eq!(meta.year.as_deref(), Some("2021 / 2022"));
    }

    #[tokio::test]
    async fn test_service_failure_falls_back_to_filename() {
        let caller = ServiceCaller::new(
            Arc::new(ScriptedCompletion::new()),
            RetryPolicy::immediate(1),
            Duration::ZERO,
        );
        let source = FetchedSource {
            url: "https://example.org/sans-indice.pdf".to_string(),
            filename: "sans-indice.pdf".to_string(),
            local_path: PathBuf::from("sans-indice.pdf"),
        };
        let meta = MetadataExtractor::new(&caller).extract(&source, "", "Université").await;
        assert_eq!(meta.doc_type, "Unknown");
        assert!(!meta.key().is_complete());
    }
}
