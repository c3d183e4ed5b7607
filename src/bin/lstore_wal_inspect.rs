//! `lstore-wal-inspect`: dump the write-ahead log of an L-Store database
//! without opening it for writes.
//!
//! Grounded on `examples/tokuhirom-murodb/src/bin/murodb_wal_inspect.rs`'s
//! CLI shape (clap subcommand-free binary, `--format text|json`, a small
//! fixed set of process exit codes) but reading this crate's WAL directly
//! through `lstore::WriteAheadLog::recover` rather than a decrypting
//! recovery pass, since this crate's log carries no encryption layer.

use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use lstore::{LoggedQuery, RedoTransaction, WriteAheadLog};

const EXIT_OK: i32 = 0;
const EXIT_EMPTY_LOG: i32 = 10;
const EXIT_FATAL_ERROR: i32 = 20;

#[derive(Clone, Debug, ValueEnum)]
enum OutputFormatArg {
    Text,
    Json,
}

/// Inspect an L-Store write-ahead log.
#[derive(Parser)]
#[command(name = "lstore-wal-inspect", about = "Inspect an L-Store write-ahead log")]
struct Cli {
    /// Path to the database directory (the one passed to `Database::open`)
    db_path: PathBuf,

    /// Output format for the report
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormatArg,
}

fn main() {
    let cli = Cli::parse();

    let wal = WriteAheadLog::open(&cli.db_path).unwrap_or_else(|e| {
        report_fatal(&cli.format, &format!("failed to open WAL under {:?}: {}", cli.db_path, e));
    });

    let transactions = wal.recover().unwrap_or_else(|e| {
        report_fatal(&cli.format, &format!("failed to parse WAL at {:?}: {}", wal.path(), e));
    });

    match cli.format {
        OutputFormatArg::Text => print_text(&transactions),
        OutputFormatArg::Json => println!("{}", build_json(&transactions)),
    }

    process::exit(if transactions.is_empty() { EXIT_EMPTY_LOG } else { EXIT_OK });
}

fn report_fatal(format: &OutputFormatArg, msg: &str) -> ! {
    match format {
        OutputFormatArg::Text => eprintln!("ERROR: {}", msg),
        OutputFormatArg::Json => {
            println!("{{\"status\":\"fatal\",\"error\":\"{}\"}}", json_escape(msg));
        }
    }
    process::exit(EXIT_FATAL_ERROR);
}

fn print_text(transactions: &[RedoTransaction]) {
    println!("WAL inspection summary:");
    println!("  unreplayed transactions: {}", transactions.len());
    let total_queries: usize = transactions.iter().map(|t| t.queries.len()).sum();
    println!("  logged queries: {}", total_queries);
    for (i, xact) in transactions.iter().enumerate() {
        println!("  [{}] start_time={} queries={}", i, xact.start_time, xact.queries.len());
        for tq in &xact.queries {
            println!("      {}: {}", tq.table_name, describe_query(&tq.query));
        }
    }
}

fn describe_query(query: &LoggedQuery) -> String {
    match query {
        LoggedQuery::Insert { columns } => format!("insert {:?}", columns),
        LoggedQuery::Update { key, columns } => format!("update key={} {:?}", key, columns),
        LoggedQuery::Increment { key, column } => format!("increment key={} column={}", key, column),
        LoggedQuery::Delete { key } => format!("delete key={}", key),
    }
}

fn build_json(transactions: &[RedoTransaction]) -> String {
    let xacts = transactions
        .iter()
        .map(|xact| {
            let queries = xact
                .queries
                .iter()
                .map(|tq| {
                    format!(
                        "{{\"table\":\"{}\",\"query\":\"{}\"}}",
                        json_escape(&tq.table_name),
                        json_escape(&describe_query(&tq.query))
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!("{{\"start_time\":{},\"queries\":[{}]}}", xact.start_time, queries)
        })
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{{\"status\":\"ok\",\"unreplayed_transactions\":{},\"transactions\":[{}]}}",
        transactions.len(),
        xacts
    )
}

fn json_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 8);
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_query_formats_each_variant() {
        assert_eq!(describe_query(&LoggedQuery::Insert { columns: vec![1, 2] }), "insert [1, 2]");
        assert_eq!(describe_query(&LoggedQuery::Delete { key: 9 }), "delete key=9");
        assert_eq!(describe_query(&LoggedQuery::Increment { key: 1, column: 2 }), "increment key=1 column=2");
    }

    #[test]
    fn build_json_empty_log() {
        let json = build_json(&[]);
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"unreplayed_transactions\":0"));
        assert!(json.contains("\"transactions\":[]"));
    }

    #[test]
    fn build_json_escapes_table_names() {
        let transactions = vec![RedoTransaction {
            start_time: 1,
            queries: vec![lstore::TableQuery {
                table_name: "weird\"name".to_string(),
                query: LoggedQuery::Delete { key: 1 },
            }],
        }];
        let json = build_json(&transactions);
        assert!(json.contains("weird\\\"name"));
    }
}
