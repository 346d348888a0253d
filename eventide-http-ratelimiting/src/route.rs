//! Route identity used to partition the rate limit space.
//!
//! A [`RouteTemplate`] is a path pattern plus the subset of its parameters
//! that are *major*: the ones whose values split a route family into separate
//! buckets. Compiling a template against concrete parameter values yields a
//! [`CompiledRoute`], which can derive the two identities rate limiting needs:
//! a fingerprint of the route family (to look up the bucket hash the API has
//! revealed for it) and the real bucket key combining that hash with the
//! authorization and major parameter values.

use crate::UNKNOWN_HASH;
use std::{
    collections::hash_map::DefaultHasher,
    fmt::{Display, Formatter, Result as FmtResult},
    hash::{Hash, Hasher},
    sync::atomic::{AtomicBool, Ordering},
};

/// HTTP method of a route.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Delete,
    Get,
    Patch,
    Post,
    Put,
}

impl Method {
    /// Name of the method.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Get => "GET",
            Self::Patch => "PATCH",
            Self::Post => "POST",
            Self::Put => "PUT",
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// A path pattern with named `{placeholder}` parameters.
///
/// Templates are expected to be `static`s: compiled routes borrow them for
/// the process lifetime, and the rate-limited flag is shared by every
/// compilation of the same template.
#[derive(Debug)]
pub struct RouteTemplate {
    path: &'static str,
    major_params: &'static [&'static str],
    has_ratelimits: AtomicBool,
}

impl RouteTemplate {
    /// Create a template for a rate limited route.
    pub const fn new(path: &'static str, major_params: &'static [&'static str]) -> Self {
        Self {
            path,
            major_params,
            has_ratelimits: AtomicBool::new(true),
        }
    }

    /// Create a template for a route with no rate limits declared on it.
    pub const fn without_ratelimits(
        path: &'static str,
        major_params: &'static [&'static str],
    ) -> Self {
        Self {
            path,
            major_params,
            has_ratelimits: AtomicBool::new(false),
        }
    }

    /// The path pattern.
    pub const fn path(&self) -> &'static str {
        self.path
    }

    /// Whether the route is known to be rate limited.
    pub fn has_ratelimits(&self) -> bool {
        self.has_ratelimits.load(Ordering::Relaxed)
    }

    /// Mark the route as rate limited for the rest of the process lifetime.
    pub fn mark_ratelimited(&self) {
        self.has_ratelimits.store(true, Ordering::Relaxed);
    }

    /// Interpolate parameter values into the pattern.
    ///
    /// `params` maps placeholder names to their values; placeholders without
    /// a value are left verbatim. Values are inserted as-is, so anything that
    /// is not URL-safe must be encoded by the caller.
    pub fn compile(&'static self, method: Method, params: &[(&str, &str)]) -> CompiledRoute {
        let mut path = String::with_capacity(self.path.len());
        let mut rest = self.path;

        while let Some(start) = rest.find('{') {
            path.push_str(&rest[..start]);
            let tail = &rest[start + 1..];

            if let Some(end) = tail.find('}') {
                let name = &tail[..end];

                match params.iter().find(|(param, _)| *param == name) {
                    Some((_, value)) => path.push_str(value),
                    None => {
                        path.push('{');
                        path.push_str(name);
                        path.push('}');
                    }
                }

                rest = &tail[end + 1..];
            } else {
                path.push('{');
                rest = tail;
            }
        }

        path.push_str(rest);

        let major_params_hash = self
            .major_params
            .iter()
            .map(|major| {
                params
                    .iter()
                    .find(|(param, _)| param == major)
                    .map_or("", |(_, value)| *value)
            })
            .collect::<Vec<_>>()
            .join("-");

        CompiledRoute {
            template: self,
            method,
            path,
            major_params_hash,
        }
    }
}

/// A route template with concrete parameter values interpolated in.
#[derive(Clone, Debug)]
pub struct CompiledRoute {
    template: &'static RouteTemplate,
    method: Method,
    path: String,
    major_params_hash: String,
}

impl CompiledRoute {
    /// The HTTP method of the call.
    pub const fn method(&self) -> Method {
        self.method
    }

    /// The interpolated path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The template the route was compiled from.
    pub const fn template(&self) -> &'static RouteTemplate {
        self.template
    }

    /// Whether the route is known to be rate limited.
    pub fn has_ratelimits(&self) -> bool {
        self.template.has_ratelimits()
    }

    /// Stable identity of the route family: the method and path pattern,
    /// independent of major parameter values.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.method.name().hash(&mut hasher);
        self.template.path.hash(&mut hasher);

        hasher.finish()
    }

    /// Key of the concrete bucket once the API's bucket hash is known.
    ///
    /// Joins the bucket hash, the authorization fingerprint, and the major
    /// parameter values with `;`.
    pub fn real_bucket_key(&self, bucket_hash: &str, auth_fingerprint: u64) -> Box<str> {
        format!(
            "{};{};{}",
            bucket_hash, auth_fingerprint, self.major_params_hash,
        )
        .into_boxed_str()
    }

    /// Placeholder bucket key for a route whose bucket hash is not yet known.
    pub fn unknown_bucket_key(&self, auth_fingerprint: u64) -> Box<str> {
        format!(
            "{};{};{}",
            UNKNOWN_HASH,
            auth_fingerprint,
            self.fingerprint(),
        )
        .into_boxed_str()
    }
}

impl Display for CompiledRoute {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.method.name())?;
        f.write_str(" ")?;

        f.write_str(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::{CompiledRoute, Method, RouteTemplate};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(CompiledRoute: Clone, Debug, Send, Sync);
    assert_impl_all!(Method: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(RouteTemplate: Debug, Send, Sync);

    static MESSAGES: RouteTemplate =
        RouteTemplate::new("/channels/{channel_id}/messages", &["channel_id"]);
    static MEMBER: RouteTemplate = RouteTemplate::new(
        "/guilds/{guild_id}/members/{user_id}",
        &["guild_id"],
    );
    static GATEWAY: RouteTemplate = RouteTemplate::without_ratelimits("/gateway", &[]);

    #[test]
    fn compile_interpolates() {
        let route = MEMBER.compile(Method::Get, &[("guild_id", "1"), ("user_id", "2")]);

        assert_eq!("/guilds/1/members/2", route.path());
        assert_eq!("GET /guilds/1/members/2", route.to_string());
    }

    #[test]
    fn compile_leaves_unbound_placeholders() {
        let route = MEMBER.compile(Method::Get, &[("guild_id", "1")]);

        assert_eq!("/guilds/1/members/{user_id}", route.path());
    }

    #[test]
    fn fingerprint_ignores_major_values() {
        let first = MESSAGES.compile(Method::Post, &[("channel_id", "123")]);
        let second = MESSAGES.compile(Method::Post, &[("channel_id", "456")]);

        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_ne!(
            first.fingerprint(),
            MESSAGES.compile(Method::Get, &[("channel_id", "123")]).fingerprint(),
        );
    }

    #[test]
    fn real_key_splits_on_major_values() {
        let first = MESSAGES.compile(Method::Post, &[("channel_id", "123")]);
        let second = MESSAGES.compile(Method::Post, &[("channel_id", "456")]);

        assert_eq!("abc;7;123", first.real_bucket_key("abc", 7).as_ref());
        assert_ne!(
            first.real_bucket_key("abc", 7),
            second.real_bucket_key("abc", 7),
        );
        assert_ne!(
            first.real_bucket_key("abc", 7),
            first.real_bucket_key("abc", 8),
        );
    }

    #[test]
    fn unknown_key_uses_fingerprint() {
        let route = MESSAGES.compile(Method::Post, &[("channel_id", "123")]);
        let key = route.unknown_bucket_key(7);

        assert!(key.starts_with("UNKNOWN;7;"));
        assert!(key.ends_with(&route.fingerprint().to_string()));
    }

    #[test]
    fn mark_ratelimited_is_permanent() {
        assert!(!GATEWAY.has_ratelimits());
        GATEWAY.mark_ratelimited();
        assert!(GATEWAY.has_ratelimits());
    }
}
