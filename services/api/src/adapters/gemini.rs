//! services/api/src/adapters/gemini.rs
//!
//! This module contains the adapter for the plant-diagnosis model.
//! It implements the `InferenceService` port from the `core` crate by calling the
//! Gemini `generateContent` REST endpoint with the image inlined.

const DIAGNOSIS_PROMPT: &str = r#"
Você é uma IA especialista em botânica, fitopatologia, agronomia e diagnóstico visual de plantas.

Seu papel é atuar como o núcleo inteligente de um micro-SaaS de análise de plantas via imagem.

FUNCIONALIDADE PRINCIPAL:
O usuário enviará uma ou mais imagens de uma planta. A partir da imagem, você deve:

1. Identificar a planta com o maior grau de precisão possível.
2. Listar os possíveis problemas da planta (nutrição, água, pragas, fungos, doenças, estresse ambiental).
3. Atribuir probabilidades percentuais para cada possível problema, sempre totalizando aproximadamente 100%.
4. Explicar de forma simples e objetiva o motivo de cada diagnóstico, baseado em sinais visuais (cor das folhas, manchas, textura, formato, murchamento, etc.).
5. Sugerir ações práticas e seguras para correção do problema (rega, adubação, exposição ao sol, controle de fungos/pragas).

FORMATO DA RESPOSTA (OBRIGATÓRIO):
Responda sempre no seguinte padrão estruturado, em português (Brasil). Use Markdown para formatar (negrito, listas).

Planta identificada:
- **Nome popular**: [Nome]
- **Nome científico**: [Nome científico]
- **Grau de confiança**: [XX%]

Possíveis diagnósticos:
- XX% de chance de [problema 1]
- XX% de chance de [problema 2]
- XX% de chance de [problema 3]

Justificativa do diagnóstico:
- [Explicação clara e objetiva, baseada nos sinais visuais da imagem]

Recomendações:
- [Ação 1]
- [Ação 2]
- [Ação 3]

Observações importantes:
- Caso a imagem não seja suficiente para um diagnóstico definitivo, deixe isso claro.
- Nunca afirme algo com 100% de certeza.
- Não utilize linguagem técnica excessiva; a resposta deve ser compreensível para leigos.
- Sempre priorize segurança para pessoas, animais e plantas.
- Se a imagem enviada não for uma planta, informe educadamente que não é possível realizar a análise.
"#;

use async_trait::async_trait;
use plantai_core::domain::NormalizedImage;
use plantai_core::ports::{InferenceService, PortError, PortResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part<'a> {
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
    Text {
        text: &'a str,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_k: u32,
    top_p: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if it has any.
    fn text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `InferenceService` against the Gemini API.
#[derive(Clone)]
pub struct GeminiAdapter {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl GeminiAdapter {
    /// Creates a new `GeminiAdapter`.
    pub fn new(api_base: String, api_key: String, model: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_base,
            api_key,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.api_base, self.model)
    }

    fn request_body(image: &NormalizedImage) -> GenerateContentRequest<'_> {
        GenerateContentRequest {
            contents: vec![Content {
                parts: vec![
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: &image.mime_type,
                            data: image.to_base64(),
                        },
                    },
                    Part::Text {
                        text: DIAGNOSIS_PROMPT,
                    },
                ],
            }],
            // Low temperature keeps the diagnoses factual.
            generation_config: GenerationConfig {
                temperature: 0.4,
                top_k: 32,
                top_p: 0.95,
            },
        }
    }
}

/// Maps a non-success HTTP status onto the port taxonomy.
fn classify_status(status: StatusCode, body: &str) -> PortError {
    match status {
        StatusCode::BAD_REQUEST => PortError::InvalidInput(format!("{}: {}", status, body)),
        StatusCode::TOO_MANY_REQUESTS => PortError::RateLimited(body.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized,
        _ => PortError::Unexpected(format!("Inference API returned {}: {}", status, body)),
    }
}

//=========================================================================================
// `InferenceService` Trait Implementation
//=========================================================================================

#[async_trait]
impl InferenceService for GeminiAdapter {
    async fn diagnose(&self, image: &NormalizedImage) -> PortResult<String> {
        debug!("Sending {} byte {} image for diagnosis", image.bytes.len(), image.mime_type);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(image))
            .send()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Inference API error {}: {}", status, body);
            return Err(classify_status(status, &body));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Malformed inference response: {}", e)))?;

        parsed.text().ok_or(PortError::EmptyResponse)
    }
}
