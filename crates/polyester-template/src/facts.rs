//! System facts gathered once per process and made available to templates
//! under the `facts` key, the way `uname`/`/etc/os-release` data is exposed
//! to shell scripts.

use serde::Serialize;
use std::sync::OnceLock;
use sysinfo::System;

#[derive(Debug, Clone, Serialize)]
pub struct Facts {
    pub hostname: String,
    pub os_name: String,
    pub os_version: String,
    pub kernel_version: String,
    pub cpu_count: usize,
    pub total_memory_bytes: u64,
}

impl Facts {
    fn gather() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        Self {
            hostname: System::host_name().unwrap_or_default(),
            os_name: System::name().unwrap_or_default(),
            os_version: System::os_version().unwrap_or_default(),
            kernel_version: System::kernel_version().unwrap_or_default(),
            cpu_count: sys.cpus().len(),
            total_memory_bytes: sys.total_memory(),
        }
    }
}

static FACTS: OnceLock<Facts> = OnceLock::new();

/// Returns the process-wide facts snapshot, gathering it on first call.
pub fn facts() -> &'static Facts {
    FACTS.get_or_init(Facts::gather)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facts_are_cached_across_calls() {
        let a = facts() as *const Facts;
        let b = facts() as *const Facts;
        assert_eq!(a, b);
    }
}
