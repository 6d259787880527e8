//! `show stat` report parsing.
//!
//! The report is CSV with a fixed column order. Its header line starts
//! with `#` and can arrive split across reads, so rows are parsed by
//! position against [`STAT_COLUMNS`], never by the header.

use hydra_core::naming::SLOT_PREFIX;

/// Column order of the `show stat` report.
pub const STAT_COLUMNS: [&str; 88] = [
    "pxname", "svname", "qcur", "qmax", "scur", "smax", "slim", "stot", "bin", "bout", "dreq",
    "dresp", "ereq", "econ", "eresp", "wretr", "wredis", "status", "weight", "act", "bck",
    "chkfail", "chkdown", "lastchg", "downtime", "qlimit", "pid", "iid", "sid", "throttle",
    "lbtot", "tracked", "type", "rate", "rate_lim", "rate_max", "check_status", "check_code",
    "check_duration", "hrsp_1xx", "hrsp_2xx", "hrsp_3xx", "hrsp_4xx", "hrsp_5xx", "hrsp_other",
    "hanafail", "req_rate", "req_rate_max", "req_tot", "cli_abrt", "srv_abrt", "comp_in",
    "comp_out", "comp_byp", "comp_rsp", "lastsess", "last_chk", "last_agt", "qtime", "ctime",
    "rtime", "ttime", "agent_status", "agent_code", "agent_duration", "check_desc", "agent_desc",
    "check_rise", "check_fall", "check_health", "agent_rise", "agent_fall", "agent_health",
    "addr", "cookie", "mode", "algo", "conn_rate", "conn_rate_max", "conn_tot", "intercepted",
    "dcon", "dses", "wrew", "connect", "reuse", "cache_lookups", "cache_hits",
];

/// Status of a slot that is out of rotation and free to bind.
pub const MAINT: &str = "MAINT";

/// Position of a named column in the report.
pub fn column_index(column: &str) -> Option<usize> {
    STAT_COLUMNS.iter().position(|c| *c == column)
}

/// One row of the report: a frontend, a backend, or a server slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRow {
    fields: Vec<String>,
}

impl StatRow {
    pub fn parse(line: &str) -> Self {
        Self {
            fields: line.split(',').map(|f| f.to_string()).collect(),
        }
    }

    /// Value of a named column; `None` when the row is shorter than the schema.
    pub fn get(&self, column: &str) -> Option<&str> {
        column_index(column)
            .and_then(|i| self.fields.get(i))
            .map(String::as_str)
    }

    /// Backend (proxy) name.
    pub fn pxname(&self) -> &str {
        self.get("pxname").unwrap_or_default()
    }

    /// Server slot name.
    pub fn svname(&self) -> &str {
        self.get("svname").unwrap_or_default()
    }

    pub fn status(&self) -> &str {
        self.get("status").unwrap_or_default()
    }

    pub fn addr(&self) -> Option<&str> {
        self.get("addr").filter(|a| !a.is_empty())
    }

    /// Whether this row is a node slot (not FRONTEND/BACKEND or another server).
    pub fn is_node_slot(&self) -> bool {
        self.svname().starts_with(SLOT_PREFIX)
    }

    pub fn is_maint(&self) -> bool {
        self.status() == MAINT
    }
}

/// Parse a full `show stat` response, skipping the header and blank lines.
pub fn parse_report(text: &str) -> Vec<StatRow> {
    text.lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(StatRow::parse)
        .collect()
}
