//! Template rendering for the `template` operator: merges manifest `vars/`,
//! gathered system [`facts`], and decoded secrets into one data bundle, then
//! renders a handlebars template against it.

pub mod facts;
pub mod secrets;

pub use facts::{facts, Facts};
pub use secrets::{NullDecoder, SecretDecoder, SecretError};

use handlebars::Handlebars;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to parse vars as YAML: {0}")]
    Vars(#[from] serde_yaml::Error),
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error("template render failed: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error("template registration failed: {0}")]
    Register(#[from] Box<handlebars::TemplateError>),
}

/// The namespaced data made available to a template: `vars` (parsed from
/// the manifest's `vars/*.yaml`), `facts` (gathered system facts), and
/// `secrets` (decoded via a [`SecretDecoder`]).
#[derive(Debug, Clone, Default)]
pub struct DataBundle {
    vars: Map<String, Value>,
    secrets: Map<String, Value>,
}

impl DataBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a `vars/*.yaml` file's parsed contents in under its own
    /// top-level keys (later files' keys win on conflict, matching the
    /// last-write-wins merge of a directory walked in sorted order).
    pub fn with_vars_yaml(mut self, yaml: &str) -> Result<Self, TemplateError> {
        let parsed: Value = serde_yaml::from_str(yaml)?;
        if let Value::Object(map) = parsed {
            self.vars.extend(map);
        }
        Ok(self)
    }

    /// Decodes and merges one secret's ciphertext under `name`, storing it
    /// as a raw string (secrets are conventionally scalar: API keys,
    /// tokens, passwords) rather than attempting to parse it as structured
    /// data.
    pub fn with_secret(
        mut self,
        decoder: &dyn SecretDecoder,
        name: &str,
        ciphertext: &[u8],
    ) -> Result<Self, TemplateError> {
        let plaintext = decoder.decode(name, ciphertext)?;
        self.secrets.insert(
            name.to_string(),
            Value::String(String::from_utf8_lossy(&plaintext).into_owned()),
        );
        Ok(self)
    }

    fn to_value(&self) -> Value {
        let mut root = Map::new();
        root.insert("vars".to_string(), Value::Object(self.vars.clone()));
        root.insert("secrets".to_string(), Value::Object(self.secrets.clone()));
        root.insert(
            "facts".to_string(),
            serde_json::to_value(facts()).unwrap_or(Value::Null),
        );
        Value::Object(root)
    }
}

/// Renders handlebars templates, either ad hoc (`render_str`) or by name
/// after registration (used when a template is rendered once to many
/// destinations).
#[derive(Default)]
pub struct TemplateEngine {
    hb: Handlebars<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut hb = Handlebars::new();
        hb.set_strict_mode(true);
        Self { hb }
    }

    pub fn render_str(&self, template: &str, data: &DataBundle) -> Result<String, TemplateError> {
        Ok(self.hb.render_template(template, &data.to_value())?)
    }

    pub fn register(&mut self, name: &str, template: &str) -> Result<(), TemplateError> {
        self.hb
            .register_template_string(name, template)
            .map_err(|e| TemplateError::Register(Box::new(e)))
    }

    pub fn render(&self, name: &str, data: &DataBundle) -> Result<String, TemplateError> {
        Ok(self.hb.render(name, &data.to_value())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_vars_and_facts() {
        let data = DataBundle::new().with_vars_yaml("name: web01\n").unwrap();
        let engine = TemplateEngine::new();
        let out = engine.render_str("host={{vars.name}}", &data).unwrap();
        assert_eq!(out, "host=web01");
    }

    #[test]
    fn renders_decoded_secret() {
        let data = DataBundle::new()
            .with_secret(&NullDecoder, "api_key", b"shh")
            .unwrap();
        let engine = TemplateEngine::new();
        let out = engine.render_str("key={{secrets.api_key}}", &data).unwrap();
        assert_eq!(out, "key=shh");
    }

    #[test]
    fn strict_mode_rejects_unknown_var() {
        let data = DataBundle::new();
        let engine = TemplateEngine::new();
        assert!(engine.render_str("{{vars.missing}}", &data).is_err());
    }

    #[test]
    fn later_vars_file_overrides_earlier() {
        let data = DataBundle::new()
            .with_vars_yaml("env: dev\n")
            .unwrap()
            .with_vars_yaml("env: prod\n")
            .unwrap();
        let engine = TemplateEngine::new();
        let out = engine.render_str("{{vars.env}}", &data).unwrap();
        assert_eq!(out, "prod");
    }
}
