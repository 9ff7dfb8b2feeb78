// Extraction Gateway - wraps the external structured-extraction provider
// Owns the prompt contracts and all raw-response sanitization. Failures never
// leave this boundary untyped: every call returns Ok(parsed) or a GatewayError
// the pipelines handle per their own policy.

use base64::Engine;
use chrono::Datelike;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::category::Category;
use crate::config::GatewayConfig;
use crate::normalize;
use crate::vendor::{VendorInfo, VendorMap};

/// Maximum tokens requested per completion
const MAX_TOKENS: u32 = 1500;

// ============================================================================
// ERRORS
// ============================================================================

/// Typed failure of a single provider call. One attempt, no retries: callers
/// decide whether the failure is fail-closed (column mapping), fail-open
/// (vendor mapping) or a reported abort (receipt extraction).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("extraction request failed: {0}")]
    Transport(String),

    #[error("extraction provider returned HTTP {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("extraction output truncated or invalid: {0}")]
    InvalidOutput(String),
}

// ============================================================================
// EXTRACTION PAYLOADS
// ============================================================================

/// Best-effort receipt extraction, sanitized but not yet validated.
///
/// Every field is optional on purpose: a syntactically valid provider reply
/// still guarantees nothing. The image pipeline runs each field through the
/// normalizer before anything reaches an ExpenseRecord.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionResult {
    pub vendor: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub date: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub line_items: Vec<RawLineItem>,
}

/// The one tagged shape provider line items are normalized into.
/// Pipelines never branch on the provider's representation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawLineItem {
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
}

/// Header mapping for one specific uploaded table.
///
/// Only meaningful for the table it was computed from, and only after the
/// caller has verified all three headers actually exist there.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ColumnMapping {
    pub date_column: String,
    pub vendor_column: String,
    pub amount_column: String,
}

// ============================================================================
// PROVIDER TRAIT
// ============================================================================

/// The extraction capability as seen by the pipelines.
///
/// The production implementation is `ExtractionGateway`; tests inject stubs.
pub trait ExtractionProvider {
    /// Extract a structured expense guess from a receipt photograph.
    fn extract_receipt(&self, image: &[u8]) -> Result<ExtractionResult, GatewayError>;

    /// Map table headers to date/vendor/amount columns. `sample` is the
    /// header row plus the first few data rows rendered as CSV.
    fn map_columns(&self, sample: &str) -> Result<ColumnMapping, GatewayError>;

    /// Batch-normalize raw vendor strings and assign categories.
    fn map_vendors(&self, raw_vendors: &[String]) -> Result<VendorMap, GatewayError>;
}

// ============================================================================
// GATEWAY
// ============================================================================

/// Client for an OpenAI-compatible chat-completions endpoint.
///
/// Constructed once at process start from resolved configuration and passed
/// by reference into the pipelines; there is no process-global client.
pub struct ExtractionGateway {
    config: GatewayConfig,
    client: Client,
}

impl ExtractionGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(ExtractionGateway { config, client })
    }

    pub fn provider(&self) -> &str {
        &self.config.provider
    }

    /// One blocking completion call. Returns the assistant text verbatim.
    fn chat(&self, model: &str, content: MessageContent) -> Result<String, GatewayError> {
        let request = ChatRequest {
            model,
            temperature: 0.0,
            max_tokens: MAX_TOKENS,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                detail: body.chars().take(200).collect(),
            });
        }

        let data: ChatResponse = response
            .json()
            .map_err(|e| GatewayError::InvalidOutput(e.to_string()))?;

        let text = data
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(text)
    }
}

impl ExtractionProvider for ExtractionGateway {
    fn extract_receipt(&self, image: &[u8]) -> Result<ExtractionResult, GatewayError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let prompt = receipt_prompt();

        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: prompt },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/jpeg;base64,{}", encoded),
                },
            },
        ]);

        let raw = self.chat(&self.config.model, content)?;
        let value = parse_json_reply(&raw)?;
        Ok(sanitize_receipt(&value))
    }

    fn map_columns(&self, sample: &str) -> Result<ColumnMapping, GatewayError> {
        let prompt = format!(
            "You are a financial data mapper. Analyze this bank statement sample.\n\
             Identify the exact column headers that correspond to the date, \
             vendor/payee, and amount.\n\
             Return ONLY a JSON object. Do not wrap in markdown.\n\
             \n\
             Rules:\n\
             - date_column: The exact header name for the transaction date.\n\
             - vendor_column: The exact header name for the merchant/payee or description.\n\
             - amount_column: The exact header name for the transaction amount.\n\
             \n\
             Sample Data:\n{}",
            sample
        );

        let raw = self.chat(&self.config.text_model, MessageContent::Text(prompt))?;
        let value = parse_json_reply(&raw)?;

        serde_json::from_value(value)
            .map_err(|e| GatewayError::InvalidOutput(format!("column mapping: {}", e)))
    }

    fn map_vendors(&self, raw_vendors: &[String]) -> Result<VendorMap, GatewayError> {
        let listing = raw_vendors
            .iter()
            .map(|v| format!("- {}", v))
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "You are an expense normalization assistant. For each raw merchant \
             string below, produce the canonical brand name (strip legal \
             suffixes like GmbH, KG, AG, Inc, store numbers and location tags, \
             fix casing) and pick one category from this exact list: [{}].\n\
             Return ONLY a JSON object keyed by the raw string, each value an \
             object with \"vendor\" and \"category\". Do not wrap in markdown.\n\
             \n\
             Raw merchants:\n{}",
            Category::prompt_list(),
            listing
        );

        let raw = self.chat(&self.config.text_model, MessageContent::Text(prompt))?;
        let value = parse_json_reply(&raw)?;
        Ok(sanitize_vendor_map(&value))
    }
}

// ============================================================================
// WIRE TYPES (OpenAI-compatible chat completions)
// ============================================================================

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

// ============================================================================
// PROMPTS
// ============================================================================

fn receipt_prompt() -> String {
    let current_year = chrono::Local::now().year();

    format!(
        "You are a highly precise expense tracking data extraction assistant. \
         Analyze this receipt image.\n\
         Return a valid JSON object ONLY.\n\
         \n\
         Extraction and Normalization Rules:\n\
         - vendor (string): Normalize the merchant name to its core brand. \
           Remove all legal suffixes (e.g., GmbH, KG, AG, e.K., OHG, mbH). \
           Fix casing to standard brand representation.\n\
         - date (string): Exact date in YYYY-MM-DD format. If the year is \
           missing, assume it is {}.\n\
         - amount (float): Total final amount charged.\n\
         - currency (string): ISO 3-letter currency code. Default to EUR.\n\
         - category (string): Categorize the expense. You MUST choose exactly \
           one from this exact list: [{}].\n\
         - description (string): A short 3-5 word summary of the main items \
           purchased.\n\
         - receipt_details (array): One object per purchased line with \
           \"name\" (string), \"quantity\" (number, default 1) and \"price\" \
           (number, total line price).",
        current_year,
        Category::prompt_list()
    )
}

// ============================================================================
// RESPONSE SANITIZATION
// ============================================================================

/// Strip markdown code fences the provider sometimes wraps JSON in.
pub fn strip_code_fence(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Parse the assistant reply as JSON after fence stripping. Syntactically
/// invalid output is a typed degraded result, not a crash.
fn parse_json_reply(raw: &str) -> Result<Value, GatewayError> {
    let cleaned = strip_code_fence(raw);
    serde_json::from_str(cleaned).map_err(|_| {
        GatewayError::InvalidOutput("provider output truncated or not valid JSON".to_string())
    })
}

/// String field, tolerating numbers and trimming whitespace.
fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric field, tolerating numbers-as-strings (including locale formats).
fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => normalize::parse_amount(s),
        _ => None,
    }
}

fn string_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key).and_then(value_as_string)
}

fn f64_field(obj: &Value, key: &str) -> Option<f64> {
    obj.get(key).and_then(value_as_f64)
}

/// Normalize a receipt reply into the sanitized ExtractionResult shape.
/// This is the single place that tolerates the provider's representational
/// quirks (string amounts, stray line-item shapes, alternate keys).
fn sanitize_receipt(value: &Value) -> ExtractionResult {
    let items = value
        .get("receipt_details")
        .or_else(|| value.get("line_items"))
        .and_then(Value::as_array)
        .map(|array| array.iter().map(sanitize_line_item).collect())
        .unwrap_or_default();

    ExtractionResult {
        vendor: string_field(value, "vendor"),
        amount: f64_field(value, "amount"),
        currency: string_field(value, "currency"),
        date: string_field(value, "date"),
        category: string_field(value, "category"),
        description: string_field(value, "description"),
        line_items: items,
    }
}

fn sanitize_line_item(value: &Value) -> RawLineItem {
    match value {
        Value::Object(_) => RawLineItem {
            name: string_field(value, "name").or_else(|| string_field(value, "item")),
            quantity: f64_field(value, "quantity").or_else(|| f64_field(value, "qty")),
            price: f64_field(value, "price").or_else(|| f64_field(value, "total")),
        },
        // A bare string is a nameless-quantity item ("Coffee")
        Value::String(_) => RawLineItem {
            name: value_as_string(value),
            quantity: None,
            price: None,
        },
        _ => RawLineItem::default(),
    }
}

/// Normalize a vendor-mapping reply. Entries the provider omitted or mangled
/// simply stay absent; the pipeline falls back per row.
fn sanitize_vendor_map(value: &Value) -> VendorMap {
    let mut map = VendorMap::empty();

    if let Value::Object(entries) = value {
        for (raw, entry) in entries {
            let vendor = string_field(entry, "vendor").unwrap_or_else(|| raw.clone());
            let category = Category::from_provider(string_field(entry, "category").as_deref());
            map.insert(raw.clone(), VendorInfo { vendor, category });
        }
    }

    map
}

// ============================================================================
// TEST SUPPORT
// ============================================================================

/// Scriptable provider for pipeline tests: `None` fields make the matching
/// call fail with a typed error, mirroring a degraded remote.
#[cfg(test)]
pub(crate) mod stub {
    use std::cell::Cell;

    use super::{ColumnMapping, ExtractionProvider, ExtractionResult, GatewayError};
    use crate::vendor::{VendorInfo, VendorMap};

    #[derive(Default)]
    pub(crate) struct StubProvider {
        pub receipt: Option<ExtractionResult>,
        pub columns: Option<ColumnMapping>,
        pub vendors: Option<Vec<(String, VendorInfo)>>,
        pub vendor_calls: Cell<usize>,
        pub column_calls: Cell<usize>,
    }

    impl StubProvider {
        /// Every call fails.
        pub fn failing() -> Self {
            StubProvider::default()
        }

        /// Successful column mapping, vendor mapping resolves nothing.
        pub fn mapping_to(date: &str, vendor: &str, amount: &str) -> Self {
            StubProvider {
                columns: Some(ColumnMapping {
                    date_column: date.to_string(),
                    vendor_column: vendor.to_string(),
                    amount_column: amount.to_string(),
                }),
                vendors: Some(Vec::new()),
                ..StubProvider::default()
            }
        }

        /// Successful receipt extraction with the given payload.
        pub fn with_receipt(result: ExtractionResult) -> Self {
            StubProvider {
                receipt: Some(result),
                ..StubProvider::default()
            }
        }

        pub fn with_vendors(mut self, entries: Vec<(String, VendorInfo)>) -> Self {
            self.vendors = Some(entries);
            self
        }

        pub fn with_failing_vendors(mut self) -> Self {
            self.vendors = None;
            self
        }
    }

    impl ExtractionProvider for StubProvider {
        fn extract_receipt(&self, _image: &[u8]) -> Result<ExtractionResult, GatewayError> {
            self.receipt.clone().ok_or_else(|| {
                GatewayError::InvalidOutput("stub: receipt extraction failed".to_string())
            })
        }

        fn map_columns(&self, _sample: &str) -> Result<ColumnMapping, GatewayError> {
            self.column_calls.set(self.column_calls.get() + 1);
            self.columns.clone().ok_or_else(|| {
                GatewayError::InvalidOutput("stub: column mapping failed".to_string())
            })
        }

        fn map_vendors(&self, _raw_vendors: &[String]) -> Result<VendorMap, GatewayError> {
            self.vendor_calls.set(self.vendor_calls.get() + 1);
            match &self.vendors {
                Some(entries) => {
                    let mut map = VendorMap::empty();
                    for (raw, info) in entries {
                        map.insert(raw.clone(), info.clone());
                    }
                    Ok(map)
                }
                None => Err(GatewayError::Transport(
                    "stub: vendor mapping unreachable".to_string(),
                )),
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
