//! The immutable description of one queued request.

use std::fmt;
use std::rc::Rc;

use crate::error::{CallbackResult, DispatchError};
use crate::http::{FormBody, Method, TransportMeta};
use crate::options::TransportOptions;

/// Per-request completion callback: `(body, meta, request)`.
///
/// Shared (`Rc`) so the dispatcher can hand the owning descriptor to its own
/// callback. Dispatch is single-threaded, so no `Send` bound is required.
pub type RequestCallback = Rc<dyn Fn(&[u8], &TransportMeta, &RequestDescriptor) -> CallbackResult>;

/// One HTTP request waiting to be dispatched.
///
/// Built with [`RequestDescriptor::get`], [`RequestDescriptor::post`] or
/// [`RequestDescriptor::new`] and refined with the `with_*` builders. Every
/// constructor validates its input, so a descriptor that exists is
/// dispatchable. Fields are read-only once built.
#[derive(Clone)]
pub struct RequestDescriptor {
    target: String,
    method: Method,
    body: Option<FormBody>,
    headers: Option<Vec<String>>,
    options: Option<TransportOptions>,
    callback: Option<RequestCallback>,
}

impl RequestDescriptor {
    /// Build a request from a free-form method string.
    ///
    /// The method is coerced with [`Method::coerce`]. An empty body counts
    /// as no body.
    pub fn new(
        target: impl Into<String>,
        method: &str,
        body: Option<FormBody>,
    ) -> Result<Self, DispatchError> {
        let target = target.into();
        if target.trim().is_empty() {
            return Err(DispatchError::EmptyTarget);
        }
        let body = body.filter(|b| !b.is_empty());
        let method = Method::coerce(method, body.is_some());
        Ok(Self {
            target,
            method,
            body,
            headers: None,
            options: None,
            callback: None,
        })
    }

    pub fn get(target: impl Into<String>) -> Result<Self, DispatchError> {
        Self::new(target, "GET", None)
    }

    pub fn post(target: impl Into<String>, body: FormBody) -> Result<Self, DispatchError> {
        Self::new(target, "POST", Some(body))
    }

    /// Replace the dispatcher-wide headers for this request.
    ///
    /// Each line must look like `Name: value`. An empty list is valid and
    /// sends no custom headers at all.
    pub fn with_headers(mut self, headers: Vec<String>) -> Result<Self, DispatchError> {
        if let Some(bad) = headers.iter().find(|line| !is_header_line(line)) {
            return Err(DispatchError::MalformedHeader(bad.clone()));
        }
        self.headers = Some(headers);
        Ok(self)
    }

    pub fn with_options(mut self, options: TransportOptions) -> Result<Self, DispatchError> {
        self.options = Some(options.validate()?);
        Ok(self)
    }

    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&[u8], &TransportMeta, &RequestDescriptor) -> CallbackResult + 'static,
    {
        self.callback = Some(Rc::new(callback));
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn body(&self) -> Option<&FormBody> {
        self.body.as_ref()
    }

    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    pub fn options(&self) -> Option<&TransportOptions> {
        self.options.as_ref()
    }

    pub fn callback(&self) -> Option<&RequestCallback> {
        self.callback.as_ref()
    }
}

impl fmt::Debug for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDescriptor")
            .field("target", &self.target)
            .field("method", &self.method)
            .field("body", &self.body)
            .field("headers", &self.headers)
            .field("options", &self.options)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

pub(crate) fn is_header_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, _)) => {
            !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':')
        }
        None => false,
    }
}
