//! OWS exception reports returned by the WFS service for rejected requests.

use crate::error::LoaderError;
use crate::xml::{XmlElement, XmlError};
use log::error;

const EXCEPTION_REPORT: &str = "ExceptionReport";

/// Turns an `<ExceptionReport>` document into a [`LoaderError::ProtocolFault`]
/// carrying the upstream exception code and its texts. The echoed request URI
/// is left out of the text.
pub fn fault_from_response(xml_content: &str) -> Result<LoaderError, XmlError> {
    let root = XmlElement::parse(xml_content)?;
    fault_from_report(&root)
}

fn fault_from_report(root: &XmlElement) -> Result<LoaderError, XmlError> {
    let exception = root
        .children
        .first()
        .ok_or_else(|| XmlError::MissingElement {
            element: "Exception".to_string(),
            parent: root.name.clone(),
        })?;
    let code = exception.attr("exceptionCode").unwrap_or_default().to_string();
    let text = exception
        .children
        .iter()
        .map(|e| e.text.as_str())
        .filter(|t| !t.contains("URI: "))
        .collect::<Vec<_>>()
        .join(" ");

    error!("Exception texts: {}", text);
    Ok(LoaderError::ProtocolFault { code, text })
}

/// Parses `body` as a fault if it is an exception report.
pub(crate) fn fault_from_body(body: &str) -> Option<LoaderError> {
    let root = XmlElement::parse(body).ok()?;
    if root.name != EXCEPTION_REPORT {
        return None;
    }
    fault_from_report(&root).ok()
}
