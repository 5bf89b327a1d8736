//! Request parameters and ad request URL generation

use std::borrow::Cow;

use crate::config::AdServer;

/// Optional targeting supplied with a load call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParameters {
    pub keywords: Option<String>,
    pub user_data_keywords: Option<String>,
    pub customer_id: Option<String>,
}

impl RequestParameters {
    pub fn new(keywords: impl Into<String>) -> Self {
        Self {
            keywords: Some(keywords.into()),
            ..Default::default()
        }
    }

    pub fn with_user_data_keywords(mut self, keywords: impl Into<String>) -> Self {
        self.user_data_keywords = Some(keywords.into());
        self
    }

    pub fn with_customer_id(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }
}

/// Builds ad request URLs against the configured ad server
#[derive(Debug, Clone)]
pub struct AdUrlGenerator {
    base_url: String,
}

impl AdUrlGenerator {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn from_config(ad_server: &AdServer) -> Self {
        Self::new(ad_server.base_url())
    }

    /// `{base}?id=<placement>[&q=..][&user_data_q=..][&customer_id=..]`,
    /// every value percent-encoded. Empty values are left out.
    pub fn generate(
        &self,
        placement_id: &str,
        keywords: Option<&str>,
        user_data_keywords: Option<&str>,
        customer_id: Option<&str>,
    ) -> String {
        let mut url = format!("{}?id={}", self.base_url, urlencoding::encode(placement_id));

        let params = [
            ("q", keywords),
            ("user_data_q", user_data_keywords),
            ("customer_id", customer_id),
        ];
        for (key, value) in params {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                let encoded: Cow<'_, str> = urlencoding::encode(value);
                url.push('&');
                url.push_str(key);
                url.push('=');
                url.push_str(&encoded);
            }
        }

        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator() -> AdUrlGenerator {
        AdUrlGenerator::new("https://ads.example.com/m/ad")
    }

    #[test]
    fn test_placement_only() {
        assert_eq!(
            generator().generate("testAdUnit", None, None, None),
            "https://ads.example.com/m/ad?id=testAdUnit"
        );
    }

    #[test]
    fn test_keywords_are_percent_encoded() {
        let url = generator().generate("testAdUnit", Some("nonsense;garbage;keywords"), None, None);
        assert!(url.contains("q=nonsense%3Bgarbage%3Bkeywords"));
    }

    #[test]
    fn test_all_parameters() {
        let url = generator().generate(
            "test ad unit",
            Some("a:b"),
            Some("age:30"),
            Some("user@example.com"),
        );
        assert_eq!(
            url,
            "https://ads.example.com/m/ad?id=test%20ad%20unit&q=a%3Ab&user_data_q=age%3A30&customer_id=user%40example.com"
        );
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let url = generator().generate("testAdUnit", Some(""), None, Some(""));
        assert_eq!(url, "https://ads.example.com/m/ad?id=testAdUnit");
    }

    #[test]
    fn test_parameters_builder() {
        let params = RequestParameters::new("keywords")
            .with_user_data_keywords("age:30")
            .with_customer_id("testCustomerId");
        assert_eq!(params.keywords.as_deref(), Some("keywords"));
        assert_eq!(params.user_data_keywords.as_deref(), Some("age:30"));
        assert_eq!(params.customer_id.as_deref(), Some("testCustomerId"));
    }
}
