use crate::http::{Request, StatusCode};

/// Whether the ESI layer handles a request or steps aside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Process,
    Bypass(BypassReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassReason {
    /// An earlier layer already answered `304 Not Modified`; there is no body to assemble.
    NotModified,
    /// A fragment sub-request issued by the layer itself.
    InternalRequest,
}

/// Decides whether a request enters the ESI path.
pub fn admit(request: &Request, status: StatusCode, marker_header: &str) -> Admission {
    if status == StatusCode::NotModified {
        Admission::Bypass(BypassReason::NotModified)
    } else if request.headers().contains(marker_header) {
        Admission::Bypass(BypassReason::InternalRequest)
    } else {
        Admission::Process
    }
}
