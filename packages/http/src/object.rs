//! Riak objects as they travel in a store request or a fetch response.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::constants::{
    CTYPE_OCTET_STREAM, HDR_CONTENT_TYPE, HDR_LINK, HDR_USERMETA_PREFIX, HDR_VCLOCK,
};
use crate::error::Error;
use crate::request::RequestMeta;
use crate::types::{Body, HttpResponse};

/// A one-way, tagged link to another object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub bucket: String,
    pub key: String,
    pub tag: String,
}

impl Link {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            tag: tag.into(),
        }
    }

    /// Parse one `</riak/bucket/key>; riaktag="tag"` entry. Links without a
    /// riaktag (such as the `rel="up"` bucket link) are skipped.
    fn parse(entry: &str) -> Option<Self> {
        let (target, params) = entry.trim().split_once(';')?;
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        let tag = params.split(';').find_map(|p| {
            p.trim()
                .strip_prefix("riaktag=")
                .map(|t| t.trim_matches('"').to_string())
        })?;

        let mut segments = target.rsplitn(3, '/');
        let key = segments.next()?;
        let bucket = segments.next()?;
        Some(Self::new(decode(bucket), decode(key), tag))
    }
}

/// Percent-decode one path segment. Form decoding treats `+`, `&` and `=`
/// specially, so those are escaped first.
fn decode(segment: &str) -> String {
    let escaped = segment
        .replace('+', "%2B")
        .replace('&', "%26")
        .replace('=', "%3D");
    url::form_urlencoded::parse(escaped.as_bytes())
        .next()
        .map(|(name, _)| name.into_owned())
        .unwrap_or_default()
}

/// A value stored under `bucket/key`, plus the metadata Riak keeps with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiakObject {
    bucket: String,
    key: String,
    value: Bytes,
    content_type: String,
    vclock: Option<String>,
    links: Vec<Link>,
    usermeta: BTreeMap<String, String>,
}

impl RiakObject {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            value: value.into(),
            content_type: CTYPE_OCTET_STREAM.to_string(),
            vclock: None,
            links: Vec::new(),
            usermeta: BTreeMap::new(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_vclock(mut self, vclock: impl Into<String>) -> Self {
        self.vclock = Some(vclock.into());
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    pub fn with_usermeta(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.usermeta.insert(name.into(), value.into());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn vclock(&self) -> Option<&str> {
        self.vclock.as_deref()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn usermeta(&self) -> &BTreeMap<String, String> {
        &self.usermeta
    }

    /// Put this object's metadata into `meta` (without overriding anything
    /// the caller set) and return the request body.
    pub fn write_to_request(
        &self,
        config: &ClientConfig,
        meta: &mut RequestMeta,
    ) -> Result<Body, Error> {
        if let Some(vclock) = &self.vclock {
            set_default(meta, HDR_VCLOCK, vclock);
        }

        if !self.links.is_empty() {
            let mut entries = Vec::with_capacity(self.links.len());
            for link in &self.links {
                let target = config.object_path(&link.bucket, Some(&link.key))?;
                entries.push(format!("<{}>; riaktag=\"{}\"", target, link.tag));
            }
            set_default(meta, HDR_LINK, &entries.join(", "));
        }

        for (name, value) in &self.usermeta {
            set_default(meta, &format!("{}{}", HDR_USERMETA_PREFIX, name), value);
        }

        let content_type = meta
            .header(HDR_CONTENT_TYPE)
            .unwrap_or(&self.content_type)
            .to_string();
        Ok(Body::new(content_type, self.value.clone()))
    }

    /// Rebuild an object from a buffered fetch response.
    pub fn from_response(bucket: &str, key: &str, response: &HttpResponse) -> Self {
        let mut object = Self::new(bucket, key, response.body.clone().unwrap_or_default());
        if let Some(content_type) = response.header(HDR_CONTENT_TYPE) {
            object.content_type = content_type.to_string();
        }
        object.vclock = response.header(HDR_VCLOCK).map(str::to_string);
        if let Some(links) = response.header(HDR_LINK) {
            object.links = links.split(',').filter_map(Link::parse).collect();
        }

        let prefix = HDR_USERMETA_PREFIX.to_ascii_lowercase();
        for (name, value) in &response.headers {
            if let Some(meta_name) = name.strip_prefix(&prefix) {
                object.usermeta.insert(meta_name.to_string(), value.clone());
            }
        }
        object
    }
}

fn set_default(meta: &mut RequestMeta, name: &str, value: &str) {
    if meta.header(name).is_none() {
        meta.set_header(name, value);
    }
}
