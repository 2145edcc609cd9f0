//! `sqlupdate` — reads a file of SQL statements, splits it on newlines
//! (or a supplied delimiter), skips
//! `#`/`--` comment lines, issues each statement against a pool, prints
//! `.` per success and `x` per failure, and logs every failing
//! statement plus its error to a log file.
//!
//! `dbpool` itself doesn't bundle a concrete database driver — it's a
//! pool/cache library generic over `dbpool::driver::Driver`. This binary
//! wires the pool up against the crate's in-memory test driver so the
//! tool can be built and run standalone; a real deployment swaps in the
//! caller's own `Driver` impl in place of `MockDriver`.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use dbpool::connection::{new_connection_pool, ConnectionPoolConfig};
use dbpool::driver::StatementMode;
use dbpool::testsupport::MockDriver;

#[derive(Parser)]
#[command(name = "sqlupdate", about = "Run a file of SQL statements against a dbpool connection pool")]
struct Args {
    /// Path to the file of SQL statements to run.
    file: PathBuf,

    /// Statement delimiter. Defaults to splitting on newlines.
    #[arg(short, long)]
    delimiter: Option<String>,

    /// Database URL.
    #[arg(long)]
    url: String,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Where to log failing statements.
    #[arg(long, default_value = "SQLUpdate.log")]
    log: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    run(args)
}

fn run(args: Args) -> ExitCode {
    let text = match fs::read_to_string(&args.file) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("sqlupdate: failed to read {}: {e}", args.file.display());
            return ExitCode::from(1);
        }
    };

    let mut log_file = match fs::OpenOptions::new().create(true).append(true).open(&args.log) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("sqlupdate: failed to open log file {}: {e}", args.log.display());
            return ExitCode::from(1);
        }
    };

    let config = ConnectionPoolConfig {
        name: "sqlupdate".into(),
        url: args.url,
        user: args.user,
        password: args.password,
        pool_size: 1,
        max_size: 1,
        ..ConnectionPoolConfig::default()
    };
    let pool = new_connection_pool(config, MockDriver::default());

    let session = match pool.check_out() {
        Ok(session) => session,
        Err(e) => {
            eprintln!("sqlupdate: failed to connect: {e}");
            return ExitCode::from(1);
        }
    };

    let delimiter = args.delimiter.as_deref().unwrap_or("\n");
    let statements: Vec<&str> = text
        .split(delimiter)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#') && !s.starts_with("--"))
        .collect();

    let mut failures = 0u32;
    for sql in &statements {
        match session.prepare_statement(sql, StatementMode::default()) {
            Ok(mut stmt) => {
                print!(".");
                let _ = stmt.close();
            }
            Err(e) => {
                print!("x");
                failures += 1;
                let _ = writeln!(log_file, "{sql}\n  -> {e}");
            }
        }
        let _ = std::io::Write::flush(&mut std::io::stdout());
    }
    println!();

    let _ = session.close();

    if failures > 0 {
        eprintln!("sqlupdate: {failures} of {} statements failed, see {}", statements.len(), args.log.display());
        ExitCode::from(1)
    } else {
        ExitCode::from(0)
    }
}
