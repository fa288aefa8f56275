//! Scroll client.

use anyhow::{bail, Context, Result};
use colored::Colorize;
use shardscroll_distributed::rpc::{connect_to_scroll_service_with_retry, ClientConfig};
use shardscroll_distributed::types::{
    ContinueScrollRequest, FieldValue, OpenScrollRequest, Page, Query,
};

pub struct ScrollArgs {
    pub coordinator: String,
    pub index: String,
    pub page_size: usize,
    pub term: Option<String>,
    pub max_pages: Option<usize>,
    pub show_hits: bool,
}

/// Parse a `field=value` term filter. Numeric and boolean values are matched
/// as such; anything else as text.
pub fn parse_term(term: &str) -> Result<Query> {
    let Some((field, value)) = term.split_once('=') else {
        bail!("Term filter must look like field=value, got '{}'", term);
    };
    if field.is_empty() {
        bail!("Term filter has an empty field name");
    }
    let value = if let Ok(n) = value.parse::<i64>() {
        FieldValue::Integer(n)
    } else if let Ok(b) = value.parse::<bool>() {
        FieldValue::Bool(b)
    } else {
        FieldValue::text(value)
    };
    Ok(Query::term(field, value))
}

pub fn run(args: ScrollArgs) -> Result<()> {
    let query = match &args.term {
        Some(term) => parse_term(term)?,
        None => Query::MatchAll,
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let addr: std::net::SocketAddr = args.coordinator.parse()?;
        let client = connect_to_scroll_service_with_retry(addr, &ClientConfig::default())
            .await
            .with_context(|| format!("Failed to reach coordinator at {addr}"))?;

        let request =
            OpenScrollRequest::new(args.index.clone(), args.page_size).with_query(query);
        let mut page = client
            .open_scroll(tarpc::context::current(), request)
            .await??;

        let mut number = 1;
        let mut total = 0;
        loop {
            total += page.hits.len();
            print_page(number, &page, args.show_hits);

            let Some(cursor_id) = page.cursor_id else {
                break;
            };
            if args.max_pages.is_some_and(|max| number >= max) {
                let cleared = client
                    .clear_scroll(tarpc::context::current(), cursor_id)
                    .await?;
                println!(
                    "{} scroll {} after {} pages (freed: {})",
                    "Cleared".yellow().bold(),
                    cursor_id,
                    number,
                    cleared.freed
                );
                break;
            }
            page = client
                .continue_scroll(
                    tarpc::context::current(),
                    ContinueScrollRequest::new(cursor_id),
                )
                .await??;
            number += 1;
        }

        println!(
            "{} {} hits from [{}]",
            "Done".green().bold(),
            total.to_string().cyan(),
            args.index
        );
        Ok(())
    })
}

fn print_page(number: usize, page: &Page, show_hits: bool) {
    let shards = format!("{}/{} shards", page.successful_shards, page.total_shards);
    let shards = if page.is_degraded() {
        shards.yellow()
    } else {
        shards.green()
    };
    println!(
        "{} {:>4}  {:>5} hits  {}",
        "page".bold(),
        number,
        page.hits.len(),
        shards
    );
    for failure in &page.shard_failures {
        let node = failure
            .node
            .as_ref()
            .map_or_else(|| "unassigned".to_string(), |n| n.to_string());
        println!(
            "    {} {} on {}: {}",
            "!".red(),
            failure.shard_id,
            node,
            failure.failure
        );
    }
    if show_hits {
        for hit in &page.hits {
            println!(
                "    {} {:.3} {}",
                hit.doc_id.cyan(),
                hit.score,
                hit.source.dimmed()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_term() {
        assert_eq!(
            parse_term("level=warn").unwrap(),
            Query::term("level", FieldValue::text("warn"))
        );
        assert_eq!(
            parse_term("seq=42").unwrap(),
            Query::term("seq", FieldValue::Integer(42))
        );
        assert_eq!(
            parse_term("ok=true").unwrap(),
            Query::term("ok", FieldValue::Bool(true))
        );
        assert_eq!(
            parse_term("a.b=x=y").unwrap(),
            Query::term("a.b", FieldValue::text("x=y"))
        );
    }

    #[test]
    fn test_parse_term_rejects_malformed() {
        assert!(parse_term("level").is_err());
        assert!(parse_term("=warn").is_err());
    }
}
