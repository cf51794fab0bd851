//! # Registro de Vídeo
//!
//! Extração de um item da API para uma linha tabular. Cada item passa por uma
//! classificação explícita: entra como `VideoRecord` ou é descartado com o motivo.

use serde_json::{Map, Value};

/// Atributos copiados do objeto `snippet`, nesta ordem.
pub const SNIPPET_ATTRS: [&str; 5] = ["title", "publishedAt", "channelId", "channelTitle", "categoryId"];

/// Caracteres que quebram um campo CSV entre aspas.
pub const BAD_CHARS: [char; 3] = ['\n', '\r', '"'];

/// Cabeçalho do CSV bruto (primeira passada), com os nomes vindos da API.
pub const RAW_HEADER: [&str; 16] = [
    "video_id",
    "title",
    "publishedAt",
    "channelId",
    "channelTitle",
    "categoryId",
    "trending_date",
    "tags",
    "view_count",
    "likes",
    "dislikes",
    "comment_count",
    "thumbnail_link",
    "comments_disabled",
    "ratings_disabled",
    "description",
];

/// Tag usada quando o vídeo não declara nenhuma.
pub const NO_TAGS: &str = "[none]";

pub const TAG_DELIMITER: &str = "|";

/// Uma linha de saída. Campos opcionais ausentes viram vazio ou zero, nunca nulo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    pub video_id: String,
    pub title: String,
    pub published_at: String,
    pub channel_id: String,
    pub channel_title: String,
    pub category_id: i64,
    pub trending_date: String,
    pub tags: Vec<String>,
    pub view_count: u64,
    pub likes: u64,
    pub dislikes: u64,
    pub comment_count: u64,
    pub thumbnail_link: String,
    pub comments_disabled: bool,
    pub ratings_disabled: bool,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Sem objeto `statistics`: vídeo removido ou indisponível.
    MissingStatistics,
    MissingVideoId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Included(VideoRecord),
    Skipped(SkipReason),
}

/// Classifica um item cru da API.
pub fn classify_item(item: &Value, trending_date: &str) -> ItemOutcome {
    let Some(stats) = item.get("statistics") else {
        return ItemOutcome::Skipped(SkipReason::MissingStatistics);
    };
    let Some(video_id) = item.get("id").and_then(scalar_text) else {
        return ItemOutcome::Skipped(SkipReason::MissingVideoId);
    };

    let empty = Map::new();
    let snippet = item.get("snippet").and_then(Value::as_object).unwrap_or(&empty);
    let text = |name: &str| snippet.get(name).and_then(scalar_text).unwrap_or_default();

    let tags = match snippet.get("tags").and_then(Value::as_array) {
        Some(list) => list.iter().filter_map(scalar_text).collect(),
        None => vec![NO_TAGS.to_string()],
    };

    let thumbnail_link = snippet
        .get("thumbnails")
        .and_then(|t| t.get("default"))
        .and_then(|d| d.get("url"))
        .and_then(scalar_text)
        .unwrap_or_default();

    // Likes e dislikes só contam juntos; a ausência de um deles desliga as avaliações.
    let (likes, dislikes, ratings_disabled) =
        match (count(stats, "likeCount"), count(stats, "dislikeCount")) {
            (Some(likes), Some(dislikes)) => (likes, dislikes, false),
            _ => (0, 0, true),
        };

    let (comment_count, comments_disabled) = match count(stats, "commentCount") {
        Some(comments) => (comments, false),
        None => (0, true),
    };

    ItemOutcome::Included(VideoRecord {
        video_id,
        title: text("title"),
        published_at: text("publishedAt"),
        channel_id: text("channelId"),
        channel_title: text("channelTitle"),
        category_id: text("categoryId").trim().parse().unwrap_or(0),
        trending_date: trending_date.to_string(),
        tags,
        view_count: count(stats, "viewCount").unwrap_or(0),
        likes,
        dislikes,
        comment_count,
        thumbnail_link,
        comments_disabled,
        ratings_disabled,
        description: text("description"),
    })
}

/// Contadores chegam como string (`"123"`) ou número.
fn count(stats: &Value, field: &str) -> Option<u64> {
    match stats.get(field)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => Some(s.trim().parse().unwrap_or(0)),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Remove os caracteres problemáticos e envolve o valor em aspas duplas.
pub fn clean_value(value: &str) -> String {
    let stripped: String = value.chars().filter(|c| !BAD_CHARS.contains(c)).collect();
    format!("\"{}\"", stripped)
}

/// Junta as tags com `|` e sanitiza o resultado.
pub fn merge_tags(tags: &[String]) -> String {
    clean_value(&tags.join(TAG_DELIMITER))
}

impl VideoRecord {
    /// Valores sanitizados na ordem de `RAW_HEADER`.
    pub fn raw_values(&self) -> Vec<String> {
        vec![
            clean_value(&self.video_id),
            clean_value(&self.title),
            clean_value(&self.published_at),
            clean_value(&self.channel_id),
            clean_value(&self.channel_title),
            clean_value(&self.category_id.to_string()),
            clean_value(&self.trending_date),
            merge_tags(&self.tags),
            clean_value(&self.view_count.to_string()),
            clean_value(&self.likes.to_string()),
            clean_value(&self.dislikes.to_string()),
            clean_value(&self.comment_count.to_string()),
            clean_value(&self.thumbnail_link),
            clean_value(&self.comments_disabled.to_string()),
            clean_value(&self.ratings_disabled.to_string()),
            clean_value(&self.description),
        ]
    }

    /// Linha do CSV bruto.
    pub fn raw_line(&self) -> String {
        self.raw_values().join(",")
    }
}
