//! Deploy-time value references.
//!
//! Most attributes of a resource (ARNs, endpoints, generated names) are only
//! known once the deployment engine creates it. A [`Token`] records where
//! such a value comes from; it is rendered into template intrinsics when a
//! stack is synthesized.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value that may only be known at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Token {
    /// A value known at synthesis time.
    Literal { value: String },
    /// The primary reference of a resource.
    Ref { stack: String, logical_id: String },
    /// A named attribute of a resource.
    Attr {
        stack: String,
        logical_id: String,
        attribute: String,
    },
    /// The deploy-time value of a published parameter.
    Parameter { name: String },
    /// Concatenation of several values.
    Join { separator: String, parts: Vec<Token> },
    /// One element of a value split on a separator.
    Select {
        index: usize,
        separator: String,
        source: Box<Token>,
    },
}

impl Token {
    pub fn literal(value: impl Into<String>) -> Self {
        Token::Literal {
            value: value.into(),
        }
    }

    pub fn join(separator: impl Into<String>, parts: Vec<Token>) -> Self {
        let separator = separator.into();
        let literals: Option<Vec<&str>> = parts.iter().map(Token::as_literal).collect();
        match literals {
            Some(values) => Token::literal(values.join(&separator)),
            None => Token::Join { separator, parts },
        }
    }

    pub fn select(index: usize, separator: impl Into<String>, source: Token) -> Self {
        let separator = separator.into();
        if let Some(value) = source.as_literal() {
            if let Some(part) = value.split(separator.as_str()).nth(index) {
                return Token::literal(part);
            }
        }
        Token::Select {
            index,
            separator,
            source: Box::new(source),
        }
    }

    /// The value when it is known at synthesis time.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Token::Literal { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.as_literal().is_some()
    }

    /// Stack that owns the referenced resource, if any.
    pub fn owner(&self) -> Option<&str> {
        match self {
            Token::Ref { stack, .. } | Token::Attr { stack, .. } => Some(stack),
            _ => None,
        }
    }

    /// Name of the export that carries this value out of its stack.
    pub fn export_name(&self) -> Option<String> {
        match self {
            Token::Ref { stack, logical_id } => {
                Some(format!("{stack}:ExportsOutputRef{logical_id}"))
            }
            Token::Attr {
                stack,
                logical_id,
                attribute,
            } => Some(format!(
                "{stack}:ExportsOutputFnGetAtt{logical_id}{}",
                attribute.replace('.', "")
            )),
            _ => None,
        }
    }

    /// Output key used in the producing stack's template.
    pub fn output_key(&self) -> Option<String> {
        self.export_name()
            .and_then(|name| name.split_once(':').map(|(_, key)| key.to_string()))
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Token::literal(value)
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Token::literal(value)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Literal { value } => write!(f, "{value}"),
            Token::Ref { stack, logical_id } => write!(f, "${{{stack}.{logical_id}}}"),
            Token::Attr {
                stack,
                logical_id,
                attribute,
            } => write!(f, "${{{stack}.{logical_id}.{attribute}}}"),
            Token::Parameter { name } => write!(f, "${{ssm:{name}}}"),
            Token::Join { separator, parts } => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{separator}")?;
                    }
                    write!(f, "{part}")?;
                }
                Ok(())
            }
            Token::Select {
                index,
                separator,
                source,
            } => write!(f, "${{select({index}, '{separator}', {source})}}"),
        }
    }
}

/// Convert a construct id such as `ecr-backend-repo` into a template
/// logical id such as `EcrBackendRepo`.
pub fn logical_id(construct_id: &str) -> String {
    construct_id
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_id() {
        assert_eq!(logical_id("ecr-backend-repo"), "EcrBackendRepo");
        assert_eq!(logical_id("eks_node_group main"), "EksNodeGroupMain");
        assert_eq!(logical_id("vpc"), "Vpc");
    }

    #[test]
    fn test_join_of_literals_collapses() {
        let token = Token::join(",", vec!["a".into(), "b".into()]);
        assert_eq!(token.as_literal(), Some("a,b"));
    }

    #[test]
    fn test_join_with_reference_stays_lazy() {
        let r = Token::Ref {
            stack: "s".to_string(),
            logical_id: "Cert".to_string(),
        };
        let token = Token::join(",", vec![r, "b".into()]);
        assert!(!token.is_resolved());
        assert_eq!(token.to_string(), "${s.Cert},b");
    }

    #[test]
    fn test_select() {
        let literal = Token::select(1, "//", Token::literal("https://oidc.example/id/X"));
        assert_eq!(literal.as_literal(), Some("oidc.example/id/X"));

        let attr = Token::Attr {
            stack: "s".to_string(),
            logical_id: "Cluster".to_string(),
            attribute: "OpenIdConnectIssuerUrl".to_string(),
        };
        assert!(matches!(
            Token::select(1, "//", attr),
            Token::Select { index: 1, .. }
        ));
    }

    #[test]
    fn test_export_name() {
        let attr = Token::Attr {
            stack: "nm-dev-db".to_string(),
            logical_id: "ApiPg".to_string(),
            attribute: "Endpoint.Address".to_string(),
        };
        assert_eq!(
            attr.export_name().as_deref(),
            Some("nm-dev-db:ExportsOutputFnGetAttApiPgEndpointAddress")
        );
        assert_eq!(
            attr.output_key().as_deref(),
            Some("ExportsOutputFnGetAttApiPgEndpointAddress")
        );
        assert!(Token::literal("x").export_name().is_none());
    }
}
