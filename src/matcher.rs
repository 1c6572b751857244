//! Reply correlation strategies
//!
//! A [`Matcher`] decides whether an inbound payload answers a request that is
//! still waiting in the pending queue. Any `Fn(&[u8], &[u8]) -> bool` closure
//! is a matcher; [`ExactMatch`] and [`KeyMatch`] cover the common schemes.

/// Decides whether `inbound` is the reply to the queued `request`
pub trait Matcher: Send + Sync + 'static {
    fn matches(&self, inbound: &[u8], request: &[u8]) -> bool;
}

impl<F> Matcher for F
where
    F: Fn(&[u8], &[u8]) -> bool + Send + Sync + 'static,
{
    fn matches(&self, inbound: &[u8], request: &[u8]) -> bool {
        self(inbound, request)
    }
}

/// Byte equality: the reply is an echo of the request
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

impl Matcher for ExactMatch {
    fn matches(&self, inbound: &[u8], request: &[u8]) -> bool {
        inbound == request
    }
}

/// Correlates by a key extracted from both payloads, e.g. an envelope id.
///
/// Payloads the extractor returns `None` for never match.
pub struct KeyMatch<F> {
    extract: F,
}

impl<F> KeyMatch<F> {
    /// Match on the key `extract` returns for both payloads
    pub fn new(extract: F) -> Self {
        Self { extract }
    }
}

impl<F, K> Matcher for KeyMatch<F>
where
    F: Fn(&[u8]) -> Option<K> + Send + Sync + 'static,
    K: PartialEq,
{
    fn matches(&self, inbound: &[u8], request: &[u8]) -> bool {
        match ((self.extract)(inbound), (self.extract)(request)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
