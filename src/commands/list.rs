use anyhow::Result;

use crate::config::AppConfig;
use crate::supervisor::ServerStatus;

use super::common::{describe_state, supervisor};

pub(crate) fn run(config: &AppConfig) -> Result<()> {
    let statuses = supervisor(config).list()?;
    print_server_table(statuses);

    Ok(())
}

fn print_server_table(statuses: Vec<ServerStatus>) {
    if statuses.is_empty() {
        println!("No servers. Create one with `craftmgr create`.");
        return;
    }

    let headers = ["NAME", "TYPE", "VERSION", "PORT", "RAM", "STATUS"];
    let rows: Vec<[String; 6]> = statuses
        .into_iter()
        .map(|status| {
            [
                status.entry.name.clone(),
                status.entry.server_type.to_string(),
                status
                    .entry
                    .version
                    .clone()
                    .unwrap_or_else(|| "-".to_string()),
                status.entry.port.to_string(),
                status.entry.ram.clone(),
                describe_state(&status.state, status.pid),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(cell.len());
        }
    }

    print_border(&widths);
    print_row(&headers, &widths);
    print_border(&widths);
    for row in &rows {
        let cells: [&str; 6] = [&row[0], &row[1], &row[2], &row[3], &row[4], &row[5]];
        print_row(&cells, &widths);
    }
    print_border(&widths);
}

fn print_border(widths: &[usize; 6]) {
    print!("+");
    for width in widths {
        print!("-{}-+", "-".repeat(*width));
    }
    println!();
}

fn print_row(cells: &[&str; 6], widths: &[usize; 6]) {
    print!("|");
    for (idx, cell) in cells.iter().enumerate() {
        print!(" {:<width$} |", cell, width = widths[idx]);
    }
    println!();
}
