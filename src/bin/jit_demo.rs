//! jit-demo - Minimal JIT engine stand-in for exercising rxpage-helper
//!
//! Every worker thread maps a page, flips it to read+execute, announces it
//! through `NOTIFY_DEBUGGER_ABOUT_RX_PAGES` and then checks the page for the
//! marker. Exits with status 0 only if every page came back marked, so it
//! fails outright when run without the helper attached.

use clap::Parser;

/// jit-demo: maps RX pages and expects each one to be marked by a debugger
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Worker threads announcing pages concurrently
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Pages mapped by each worker
    #[arg(long, default_value_t = 100)]
    pages: usize,

    /// Keep the workers alive this long after their last page
    #[arg(long, default_value_t = 0)]
    linger_ms: u64,
}

/// The debugger hooks this symbol; the body only keeps it from being folded
#[no_mangle]
#[inline(never)]
#[allow(non_snake_case)]
pub extern "C" fn NOTIFY_DEBUGGER_ABOUT_RX_PAGES(base: *const u8, len: usize) {
    std::hint::black_box((base, len));
}

#[cfg(target_os = "linux")]
mod engine {
    use rxpage_helper::rx_pages::DEFAULT_MARKER;

    const PAGE_SIZE: usize = 4096;

    /// Map one page RW, seal it RX, announce it and report whether the
    /// marker showed up
    pub fn map_and_announce() -> std::io::Result<bool> {
        // SAFETY: fresh anonymous mapping, unmapped before returning
        unsafe {
            let page = libc::mmap(
                std::ptr::null_mut(),
                PAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            if page == libc::MAP_FAILED {
                return Err(std::io::Error::last_os_error());
            }

            let result = if libc::mprotect(page, PAGE_SIZE, libc::PROT_READ | libc::PROT_EXEC) == 0 {
                let base = page as *const u8;
                super::NOTIFY_DEBUGGER_ABOUT_RX_PAGES(base, PAGE_SIZE);
                let head = std::slice::from_raw_parts(base, DEFAULT_MARKER.len());
                Ok(head == DEFAULT_MARKER)
            } else {
                Err(std::io::Error::last_os_error())
            };

            libc::munmap(page, PAGE_SIZE);
            result
        }
    }
}

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    use std::time::Duration;

    let args = Args::parse();

    let workers: Vec<_> = (0..args.threads.max(1))
        .map(|_| {
            let pages = args.pages;
            let linger = Duration::from_millis(args.linger_ms);
            std::thread::spawn(move || -> std::io::Result<usize> {
                let mut missing = 0;
                for _ in 0..pages {
                    if !engine::map_and_announce()? {
                        missing += 1;
                    }
                }
                std::thread::sleep(linger);
                Ok(missing)
            })
        })
        .collect();

    let mut missing = 0;
    for worker in workers {
        missing += worker
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;
    }

    println!(
        "[*] threads={} calls={} missing_marker={}",
        args.threads.max(1),
        args.threads.max(1) * args.pages,
        missing
    );
    if missing > 0 {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() -> anyhow::Result<()> {
    let _ = Args::parse();
    anyhow::bail!("jit-demo needs Linux");
}
