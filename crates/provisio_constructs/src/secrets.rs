//! Generated secrets.

use serde_json::json;

use provisio_core::{CoreResult, StackScope, Token};

/// How the secret value is generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretStringGenerator {
    pub password_length: u32,
    pub exclude_punctuation: bool,
    /// JSON document the generated value is merged into
    pub secret_string_template: Option<String>,
    /// Key of the generated value inside the template
    pub generate_string_key: Option<String>,
}

impl SecretStringGenerator {
    /// Alphanumeric password of `length` characters.
    pub fn password(length: u32) -> Self {
        Self {
            password_length: length,
            exclude_punctuation: true,
            secret_string_template: None,
            generate_string_key: None,
        }
    }

    /// JSON secret holding `username` and a generated `password`.
    pub fn credentials(username: &str, length: u32) -> Self {
        Self {
            secret_string_template: Some(json!({ "username": username }).to_string()),
            generate_string_key: Some("password".to_string()),
            ..Self::password(length)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Secret {
    construct_id: String,
    name: Option<String>,
    generator: SecretStringGenerator,
}

impl Secret {
    pub fn new(construct_id: impl Into<String>, generator: SecretStringGenerator) -> Self {
        Self {
            construct_id: construct_id.into(),
            name: None,
            generator,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add(self, scope: &mut StackScope<'_>) -> CoreResult<SecretRef> {
        let generator = &self.generator;
        let mut generate = json!({
            "PasswordLength": generator.password_length,
            "ExcludePunctuation": generator.exclude_punctuation,
        });
        if let Some(template) = &generator.secret_string_template {
            generate["SecretStringTemplate"] = json!(template);
        }
        if let Some(key) = &generator.generate_string_key {
            generate["GenerateStringKey"] = json!(key);
        }

        let mut properties = json!({ "GenerateSecretString": generate });
        if let Some(name) = &self.name {
            scope.claim_name("secret", name)?;
            properties["Name"] = json!(name);
        }
        let resource =
            scope.add_resource(&self.construct_id, "AWS::SecretsManager::Secret", properties)?;

        let arn = resource.ref_token();
        Ok(SecretRef {
            name: match self.name {
                Some(name) => Token::literal(name),
                None => arn.clone(),
            },
            arn,
        })
    }
}

/// Handle to a declared secret.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretRef {
    pub arn: Token,
    pub name: Token,
}

impl SecretRef {
    /// Dynamic reference to a JSON field of the secret value.
    pub fn field(&self, key: &str) -> Token {
        Token::join(
            "",
            vec![
                Token::literal("{{resolve:secretsmanager:"),
                self.arn.clone(),
                Token::literal(format!(":SecretString:{key}::}}}}")),
            ],
        )
    }
}
