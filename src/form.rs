//! Selection of the forms to attempt for an interaction
//!
//! Declaration order is the fallback order: the first usable form is tried first.

use std::fmt;

use tracing::trace;
use url::Url;

use crate::{
    protocol::{coap, http},
    thing::Form,
};

/// The binding used to reach an endpoint, chosen by URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Coap,
}

impl Protocol {
    /// `coap://` selects CoAP, everything else goes over HTTP
    pub fn from_url(url: &Url) -> Self {
        match url.scheme() {
            "coap" => Self::Coap,
            _ => Self::Http,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("http"),
            Self::Coap => f.write_str("coap"),
        }
    }
}

/// A usable form, with its target resolved to an absolute URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: Url,
    pub content_type: String,
    pub protocol: Protocol,
    pub http_method: Option<http::Method>,
    pub coap_method: Option<coap::Method>,
}

impl Endpoint {
    fn from_form(form: &Form, url: Url) -> Self {
        Self {
            protocol: Protocol::from_url(&url),
            content_type: form.content_type().to_string(),
            http_method: form.http_method,
            coap_method: form.coap_method,
            url,
        }
    }
}

/// Filters and orders candidate forms
#[derive(Debug, Clone, Default)]
pub struct FormSelector {
    base: Option<Url>,
}

impl FormSelector {
    /// A selector resolving relative hrefs against `base`, the Thing's base URI
    pub fn new(base: Option<&str>) -> Self {
        let base = base.and_then(|base| Url::parse(base).ok());
        Self { base }
    }

    /// Keeps the forms with a resolvable href, in declaration order
    pub fn select(&self, forms: &[Form]) -> Vec<Endpoint> {
        forms
            .iter()
            .filter_map(|form| {
                let url = form.href.as_deref().and_then(|href| self.resolve(href));
                if url.is_none() {
                    trace!(href = ?form.href, "discarding form without usable href");
                }
                url.map(|url| Endpoint::from_form(form, url))
            })
            .collect()
    }

    fn resolve(&self, href: &str) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() {
            return None;
        }

        match Url::parse(href) {
            Ok(url) => Some(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                self.base.as_ref().and_then(|base| base.join(href).ok())
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn form(href: Option<&str>) -> Form {
        Form {
            href: href.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn keeps_declaration_order() {
        let forms = [
            form(Some("http://a/bad")),
            form(None),
            form(Some("coap://b/ok")),
            form(Some("")),
            form(Some("http://c/last")),
        ];

        let selected = FormSelector::default().select(&forms);
        let urls: Vec<_> = selected.iter().map(|e| e.url.as_str()).collect();

        assert_eq!(urls, ["http://a/bad", "coap://b/ok", "http://c/last"]);
        assert_eq!(selected[0].protocol, Protocol::Http);
        assert_eq!(selected[1].protocol, Protocol::Coap);
    }

    #[test]
    fn relative_hrefs_need_a_base() {
        let forms = [form(Some("status")), form(Some("/things/lamp"))];

        assert!(FormSelector::new(None).select(&forms).is_empty());

        let selector = FormSelector::new(Some("https://mylamp.example.com/api/"));
        let selected = selector.select(&forms);
        let urls: Vec<_> = selected.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            [
                "https://mylamp.example.com/api/status",
                "https://mylamp.example.com/things/lamp"
            ]
        );
    }

    #[test]
    fn invalid_base_is_ignored() {
        let forms = [form(Some("status")), form(Some("http://a/ok"))];

        let selected = FormSelector::new(Some("not a base")).select(&forms);

        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].url.as_str(), "http://a/ok");
    }

    #[test]
    fn endpoint_carries_form_details() {
        let forms = [Form {
            href: Some("coap://[2001:DB8::1]/status".to_string()),
            content_type: Some("application/json".to_string()),
            coap_method: Some(coap::Method::Get),
            ..Default::default()
        }];

        let endpoint = &FormSelector::default().select(&forms)[0];

        assert_eq!(endpoint.protocol, Protocol::Coap);
        assert_eq!(endpoint.content_type, "application/json");
        assert_eq!(endpoint.coap_method, Some(coap::Method::Get));
    }

    #[test]
    fn scheme_selects_protocol() {
        let coap = Url::parse("coap://host/x").unwrap();
        let https = Url::parse("https://host/x").unwrap();
        let coaps = Url::parse("coaps://host/x").unwrap();

        assert_eq!(Protocol::from_url(&coap), Protocol::Coap);
        assert_eq!(Protocol::from_url(&https), Protocol::Http);
        assert_eq!(Protocol::from_url(&coaps), Protocol::Http);
    }
}
