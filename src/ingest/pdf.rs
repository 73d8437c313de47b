use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;

use super::normalize_text;
use crate::models::PageText;

/// Reads a PDF page by page with poppler when available, otherwise as one block via `pdf-extract`.
pub async fn read_pdf_pages(pdf_path: &Path) -> Result<Vec<PageText>> {
    let mut pages = Vec::new();

    if has_command("pdftotext").await {
        let page_count = get_pdf_page_count(pdf_path).await.unwrap_or(0);
        for page in 1..=page_count {
            let output = Command::new("pdftotext")
                .arg("-f")
                .arg(page.to_string())
                .arg("-l")
                .arg(page.to_string())
                .arg("-layout")
                .arg("-nopgbrk")
                .arg(pdf_path)
                .arg("-")
                .output()
                .await
                .with_context(|| format!("failed to run pdftotext for page {}", page))?;

            if !output.status.success() {
                continue;
            }

            let content = normalize_text(&String::from_utf8_lossy(&output.stdout));
            if content.is_empty() {
                continue;
            }

            pages.push(PageText {
                page: Some(page as i64),
                content,
            });
        }
    }

    if pages.is_empty() {
        let pdf_path = pdf_path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text(&pdf_path))
            .await
            .context("PDF extraction task panicked")?
            .context("failed to extract text from PDF")?;

        let content = normalize_text(&extracted);
        if !content.is_empty() {
            pages.push(PageText {
                page: None,
                content,
            });
        }
    }

    if pages.is_empty() {
        anyhow::bail!("no extractable text found in PDF");
    }

    Ok(pages)
}

async fn get_pdf_page_count(pdf_path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .await
        .context("failed to run pdfinfo")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("pdfinfo exited with non-zero status"));
    }

    parse_page_count(&String::from_utf8_lossy(&output.stdout))
}

fn parse_page_count(pdfinfo_output: &str) -> Result<usize> {
    let regex = Regex::new(r"(?m)^Pages:\s+(\d+)\s*$")?;
    regex
        .captures(pdfinfo_output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .ok_or_else(|| anyhow::anyhow!("unable to parse page count from pdfinfo"))
}

async fn has_command(binary: &str) -> bool {
    // pdfinfo/pdftotext exit non-zero on --version with some poppler builds.
    Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}
