// Host version tracking. `VERSION` is the value this binary advertises to
// plugins during the handshake compatibility check (spec §4.A) and in
// `GET /health`. `API_VERSION` is the coarse same-major compatibility tag
// checked byte-for-byte against each plugin's declared `GetAPIVersion`
// (spec §4.A `IsAPICompatible`, §4.C handshake).

pub const VERSION: &str = "0.1.0";
pub const BUILD: &str = "0001";
pub const API_VERSION: &str = "v1";

pub fn version_string() -> String {
    format!("v{}-{}", VERSION, BUILD)
}

pub fn full_version_info() -> String {
    format!("agentforge-host {} (build {})", VERSION, BUILD)
}
