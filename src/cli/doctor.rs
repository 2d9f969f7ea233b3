//! Environment readiness check.

use anyhow::Result;
use std::process::Command;

use crate::driver::chromium::find_chromium;
use crate::strategy::StrategyRegistry;

/// Check Chromium availability, the built-in strategy set, and memory.
pub async fn run() -> Result<()> {
    println!("Taxprobe Doctor");
    println!("===============");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    let chromium_path = find_chromium();
    match &chromium_path {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Install Chrome/Chromium or set TAXPROBE_CHROMIUM_PATH."
        ),
    }

    let strategies_ok = match StrategyRegistry::builtin() {
        Ok(registry) => {
            println!("[OK] Built-in strategies loaded: {}", registry.len());
            true
        }
        Err(e) => {
            println!("[!!] Built-in strategies failed to load: {e:#}");
            false
        }
    };

    match get_available_memory_mb() {
        Some(mb) => {
            if mb >= 512 {
                println!("[OK] Available memory: {mb}MB (>= 512MB required for Chromium)");
            } else {
                println!("[!!] Available memory: {mb}MB (< 512MB, Chromium may struggle)");
            }
        }
        None => println!("[??] Could not determine available memory"),
    }

    println!();
    if chromium_path.is_some() && strategies_ok {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
        if chromium_path.is_none() {
            println!("  Browser-transport jurisdictions need Chromium; HTTP-only batches still run.");
        }
    }

    Ok(())
}

/// Get available memory in MB (platform-specific).
fn get_available_memory_mb() -> Option<u64> {
    #[cfg(target_os = "macos")]
    {
        let output = Command::new("sysctl")
            .args(["-n", "hw.memsize"])
            .output()
            .ok()?;
        let s = String::from_utf8_lossy(&output.stdout);
        let bytes: u64 = s.trim().parse().ok()?;
        Some(bytes / 1_048_576)
    }
    #[cfg(target_os = "linux")]
    {
        let output = Command::new("free").args(["-m"]).output().ok()?;
        let s = String::from_utf8_lossy(&output.stdout);
        for line in s.lines() {
            if line.starts_with("Mem:") {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 7 {
                    return parts[6].parse().ok();
                }
            }
        }
        None
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        None
    }
}
