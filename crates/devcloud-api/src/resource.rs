// Resource descriptors
//
// An immutable description of one API call, built by domain code and
// consumed by the `Dispatcher`. Nothing here touches the network.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::Error;

/// HTTP method of a [`Resource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Request body of a [`Resource`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    #[default]
    None,
    /// Serialized eagerly so the descriptor stays `Clone` and immutable.
    Json(serde_json::Value),
    /// `application/x-www-form-urlencoded`, in insertion order.
    Form(Vec<(String, String)>),
    /// `multipart/form-data`.
    Multipart(Vec<Part>),
}

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text {
        name: String,
        value: String,
    },
    /// File payload, read from `path` when the request is built.
    File {
        name: String,
        path: PathBuf,
        media_type: String,
    },
}

impl Part {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn file(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        media_type: impl Into<String>,
    ) -> Self {
        Self::File {
            name: name.into(),
            path: path.into(),
            media_type: media_type.into(),
        }
    }
}

/// Description of one API call.
///
/// `path` is relative to the API base URL with identifiers already
/// interpolated (e.g. `v1/devices/0123abcd`). Query parameters keep their
/// insertion order. Descriptors require a bearer credential unless built
/// with [`anonymous()`](Self::anonymous).
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Body,
    requires_auth: bool,
}

impl Resource {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: Body::None,
            requires_auth: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    // ── Builders ─────────────────────────────────────────────────────

    /// Append a query parameter. Repeated names are kept, in order.
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Set a JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, Error> {
        let value = serde_json::to_value(value).map_err(|e| {
            Error::invalid_request(format!("request body could not be serialized: {e}"))
                .with_source(e)
        })?;
        self.body = Body::Json(value);
        Ok(self)
    }

    /// Set a url-encoded form body.
    pub fn form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Set a multipart body.
    pub fn multipart(mut self, parts: Vec<Part>) -> Self {
        self.body = Body::Multipart(parts);
        self
    }

    /// Mark the call as not requiring a bearer credential.
    pub fn anonymous(mut self) -> Self {
        self.requires_auth = false;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_parameters(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    /// Short label for logs and the in-flight registry (`"GET v1/devices"`).
    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}
