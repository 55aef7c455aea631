pub mod calib;
pub mod new;
pub mod run;
pub mod sort;
pub mod table;

use anyhow::{Context, Result};
use console::Term;

/// Run `f` inside a dedicated rayon pool of `num_proc` workers.
pub fn with_pool<T: Send>(num_proc: usize, f: impl FnOnce() -> T + Send) -> Result<T> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_proc)
        .build()
        .context("could not build worker pool")?;
    Ok(pool.install(f))
}

/// Interactive yes/no prompt, defaulting to no.
pub fn confirm(prompt: &str) -> Result<bool> {
    let term = Term::stdout();
    term.write_str(&format!("{prompt} [y/N] "))?;
    let line = term.read_line()?;
    Ok(line.trim().eq_ignore_ascii_case("y"))
}
