use crate::core::{Surface, SurfaceMethod};
use crate::http::ProbeRequest;

/// Value every non-injected parameter carries when the page gave it none.
pub const BASELINE_VALUE: &str = "test";

/// Represents the place in a request a payload is written to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InjectionPoint {
    /// Injection into a URL query parameter. Contains the parameter name
    QueryParam(String),
    /// Injection into a form-urlencoded body field. Contains the field name
    FormParam(String),
}

impl InjectionPoint {
    pub fn name(&self) -> &str {
        match self {
            InjectionPoint::QueryParam(name) | InjectionPoint::FormParam(name) => name,
        }
    }
}

/// Extracts every addressable injection point of a surface
///
/// Unnamed form fields cannot be addressed in a request and are skipped.
///
/// # Arguments
/// `surface` - The discovered form or parameterized URL
///
/// # Returns
/// One point per named parameter, in surface order
pub fn extract_injection_points(surface: &Surface) -> Vec<InjectionPoint> {
    surface
        .injectable()
        .map(|p| match surface.method {
            SurfaceMethod::Get => InjectionPoint::QueryParam(p.name.clone()),
            SurfaceMethod::Post => InjectionPoint::FormParam(p.name.clone()),
        })
        .collect()
}

/// Builds the request that injects `value` at `point`
///
/// Every other named parameter is reset to its page default, or to
/// `BASELINE_VALUE`, so a previous payload never leaks into the next one.
///
/// # Arguments
/// * `surface` - Surface the point belongs to
/// * `point` - Where to inject
/// * `value` - The string to inject
pub fn mutate_request(surface: &Surface, point: &InjectionPoint, value: &str) -> ProbeRequest {
    let target = point.name();
    let params = surface
        .injectable()
        .map(|p| {
            let v = if p.name == target {
                value.to_string()
            } else {
                baseline_for(p.default_value.as_deref())
            };
            (p.name.clone(), v)
        })
        .collect();

    ProbeRequest::new(surface.method.as_method(), surface.endpoint.clone(), params)
}

fn baseline_for(default_value: Option<&str>) -> String {
    default_value.unwrap_or(BASELINE_VALUE).to_string()
}
