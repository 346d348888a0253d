//! Selection of the TLS backend for the default transport.
//!
//! Exactly one backend is compiled in, picked by the crate's TLS features.
//! With none enabled the connector speaks plain HTTP, which is only useful
//! behind a terminating proxy.

/// Connector backed by `rustls`.
#[cfg(any(feature = "rustls-native-roots", feature = "rustls-webpki-roots"))]
pub type Connector = hyper_rustls::HttpsConnector<hyper::client::HttpConnector>;

/// Connector backed by the platform TLS library.
#[cfg(all(
    feature = "native",
    not(any(feature = "rustls-native-roots", feature = "rustls-webpki-roots"))
))]
pub type Connector = hyper_tls::HttpsConnector<hyper::client::HttpConnector>;

/// Plain HTTP connector, for proxied setups without any TLS feature.
#[cfg(not(any(
    feature = "native",
    feature = "rustls-native-roots",
    feature = "rustls-webpki-roots"
)))]
pub type Connector = hyper::client::HttpConnector;

/// Create the connector selected by the enabled features.
pub fn create() -> Connector {
    let mut http = hyper::client::HttpConnector::new();
    http.enforce_http(false);

    wrap(http)
}

#[cfg(any(feature = "rustls-native-roots", feature = "rustls-webpki-roots"))]
fn wrap(http: hyper::client::HttpConnector) -> Connector {
    let builder = hyper_rustls::HttpsConnectorBuilder::new();

    #[cfg(feature = "rustls-native-roots")]
    let builder = builder.with_native_roots();
    #[cfg(all(feature = "rustls-webpki-roots", not(feature = "rustls-native-roots")))]
    let builder = builder.with_webpki_roots();

    builder
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http)
}

#[cfg(all(
    feature = "native",
    not(any(feature = "rustls-native-roots", feature = "rustls-webpki-roots"))
))]
fn wrap(http: hyper::client::HttpConnector) -> Connector {
    hyper_tls::HttpsConnector::new_with_connector(http)
}

#[cfg(not(any(
    feature = "native",
    feature = "rustls-native-roots",
    feature = "rustls-webpki-roots"
)))]
fn wrap(http: hyper::client::HttpConnector) -> Connector {
    http
}
