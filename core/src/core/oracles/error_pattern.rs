use log::warn;
use regex::{Regex, RegexBuilder};

use super::{Oracle, Probe, UNDECODABLE_BODY};
use crate::core::{OracleKind, Payload, Verdict, VulnerabilityClass};

/// Dialect-specific database error messages (MySQL, PostgreSQL, MSSQL, Oracle).
const SQL_ERROR_PATTERNS: &[&str] = &[
    r"SQL syntax.*MySQL",
    r"Warning.*mysql_",
    r"valid MySQL result",
    r"MySqlClient",
    r"PostgreSQL.*ERROR",
    r"Warning.*pg_",
    r"valid PostgreSQL result",
    r"Npgsql",
    r"Driver.* SQL[-_ ]*Server",
    r"OLE DB.* SQL Server",
    r"SQL Server.*Driver",
    r"SQL Server.*[0-9a-fA-F]{8}",
    r"\[Microsoft\]\[ODBC SQL Server Driver\]",
    r"Exception.*\[Microsoft\]\[SQL Server\]",
    r"Oracle.*Driver",
    r"Warning.*oci_",
    r"Warning.*ora_",
    r"ORA-[0-9][0-9][0-9][0-9]",
    r"You have an error in your SQL syntax",
    r"SQL syntax error",
    r"SQLSTATE\[",
    r"Unclosed quotation mark",
];

/// Contents of files commonly reached by traversal.
const FILE_DISCLOSURE_PATTERNS: &[&str] = &[
    r"root:[x*]?:0:0:",
    r"root:.*:0:0:",
    r"daemon:[x*]?:1:1:",
    r"\[boot loader\]",
    r"\[fonts\]",
    r"\[extensions\]",
    r"for 16-bit app support",
    r"PD9waHA",
];

/// Markers of remote content that was included and echoed.
const REMOTE_INCLUSION_PATTERNS: &[&str] = &[
    r"(?s)<\?php.{0,200}?\?>",
    r"php echo",
    r"RFI Test",
    r"rfi_marker_[0-9a-f]+",
];

/// Flags a response whose body matches any pattern in a fixed list.
/// Evidence is the matched substring.
pub struct ErrorPatternOracle {
    class: VulnerabilityClass,
    patterns: Vec<Regex>,
}

impl ErrorPatternOracle {
    pub fn new(class: VulnerabilityClass, patterns: &[&str]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| {
                match RegexBuilder::new(p).case_insensitive(true).build() {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("Skipping invalid pattern '{}': {}", p, e);
                        None
                    }
                }
            })
            .collect();
        Self { class, patterns }
    }

    pub fn sql_errors() -> Self {
        Self::new(VulnerabilityClass::SqlInjection, SQL_ERROR_PATTERNS)
    }

    pub fn file_disclosure() -> Self {
        Self::new(VulnerabilityClass::Lfi, FILE_DISCLOSURE_PATTERNS)
    }

    pub fn remote_inclusion() -> Self {
        Self::new(VulnerabilityClass::Rfi, REMOTE_INCLUSION_PATTERNS)
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// First match in pattern order.
    pub fn find<'b>(&self, body: &'b str) -> Option<&'b str> {
        self.patterns
            .iter()
            .find_map(|re| re.find(body))
            .map(|m| m.as_str())
    }
}

impl Oracle for ErrorPatternOracle {
    fn kind(&self) -> OracleKind {
        OracleKind::Error
    }

    fn applies_to(&self, payload: &Payload) -> bool {
        payload.class == self.class
    }

    fn evaluate(&self, probe: &Probe<'_>) -> Verdict {
        if !probe.response.decoded {
            return Verdict::negative(OracleKind::Error, UNDECODABLE_BODY);
        }
        match self.find(&probe.response.body) {
            Some(matched) => Verdict::positive(OracleKind::Error, matched),
            None => Verdict::negative(OracleKind::Error, "no known signature in response"),
        }
    }
}
