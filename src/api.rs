//! Cliente HTTP da API paginada de estatísticas de vídeos.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ApiError;
use crate::models::ScraperConfig;

/// Partes do recurso solicitadas em cada página.
pub const PAGE_PARTS: &str = "id,statistics,snippet";

/// Seletor do ranking consultado.
pub const CHART: &str = "mostPopular";

/// Uma página da resposta: itens crus e o token de continuação, se houver.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VideoPage {
    #[serde(default)]
    pub items: Vec<Value>,

    #[serde(rename = "nextPageToken", default)]
    pub next_page_token: Option<String>,
}

/// Fonte de páginas de vídeos. `page` começa em 1 e serve apenas de contexto.
pub trait PageSource {
    fn fetch_page(
        &self,
        region: &str,
        page_token: Option<&str>,
        page: usize,
    ) -> Result<VideoPage, ApiError>;
}

/// Cria o cliente HTTP reutilizável (keep-alive entre páginas e regiões).
pub fn create_http_client(timeout: Duration) -> Result<Client, ApiError> {
    let client = Client::builder()
        .timeout(timeout)
        .user_agent(concat!("youtube_etl/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Implementação real sobre `reqwest::blocking`: uma requisição por vez.
pub struct YouTubeApi {
    client: Client,
    api_url: String,
    api_key: String,
    page_size: u32,
}

impl YouTubeApi {
    pub fn new(client: Client, config: &ScraperConfig, api_key: String) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            api_key,
            page_size: config.page_size,
        }
    }

    /// Monta a URL da página com os parâmetros de consulta.
    pub fn page_url(&self, region: &str, page_token: Option<&str>) -> Result<Url, ApiError> {
        let mut params: Vec<(&str, String)> = vec![
            ("part", PAGE_PARTS.to_string()),
            ("chart", CHART.to_string()),
            ("regionCode", region.to_string()),
            ("maxResults", self.page_size.to_string()),
            ("key", self.api_key.clone()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        Url::parse_with_params(&self.api_url, &params)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", self.api_url, e)))
    }
}

impl PageSource for YouTubeApi {
    fn fetch_page(
        &self,
        region: &str,
        page_token: Option<&str>,
        page: usize,
    ) -> Result<VideoPage, ApiError> {
        let url = self.page_url(region, page_token)?;
        debug!(region, page, "consultando página da API");

        let response = self.client.get(url).send()?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::RateLimited {
                region: region.to_string(),
                page,
            });
        }

        // Outros erros HTTP seguem adiante: o corpo de erro não tem `items`
        // nem `nextPageToken`, então a região termina nesta página.
        if !status.is_success() {
            warn!(region, page, status = %status, "API respondeu com erro HTTP");
        }

        let body = response.text()?;
        serde_json::from_str(&body).map_err(|source| ApiError::InvalidPayload {
            region: region.to_string(),
            page,
            source,
        })
    }
}
