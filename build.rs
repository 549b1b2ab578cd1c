//! Stamps build date and time into the crate. Either can be pinned from the
//! environment for reproducible builds.

use time::format_description;
use time::OffsetDateTime;

fn stamp(var: &str, pattern: &str, now: OffsetDateTime) {
    println!("cargo:rerun-if-env-changed={}", var);
    let value = std::env::var(var).unwrap_or_else(|_| {
        format_description::parse(pattern)
            .ok()
            .and_then(|f| now.format(&f).ok())
            .unwrap_or_else(|| "unknown".to_string())
    });
    println!("cargo:rustc-env={}={}", var, value);
}

fn main() {
    let now = OffsetDateTime::now_utc();
    stamp("BLENDLINK_BUILD_DATE", "[month repr:short] [day padding:space] [year]", now);
    stamp("BLENDLINK_BUILD_TIME", "[hour]:[minute]:[second]", now);
}
