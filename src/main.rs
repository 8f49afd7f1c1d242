use std::io::{self, Write};

use anyhow::{Context, Result};
use update_fetcher::{Download, DownloadOutcome, Downloader, Manifest, ManifestClient, Progress, UpdateDescriptor};

const DEFAULT_PRODUCT_ID: &str = "BLUS31426";
const INSTALL_HINT: &str = "Install the packages in the listed order, oldest first, up to the version you want.";

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    println!("Update Downloader");

    let product_id = prompt(&format!("Product ID [{DEFAULT_PRODUCT_ID}]: "))?;
    let product_id = if product_id.is_empty() { DEFAULT_PRODUCT_ID.to_string() } else { product_id };

    // The update hosts present certificates that fail normal verification,
    // so both clients waive the check explicitly.
    let client = ManifestClient::new().accept_invalid_certs(true);
    let manifest = client
        .fetch(&product_id)
        .await
        .with_context(|| format!("failed to load updates for {product_id}"))?;

    println!("\n{}", manifest.title);
    if manifest.updates.is_empty() {
        println!("No updates are available for {product_id}.");
        return Ok(());
    }
    for (index, update) in manifest.updates.iter().enumerate() {
        println!("  {}. {update}", index + 1);
    }

    let selected = select_updates(&manifest)?;
    let default_dir = manifest.default_directory();
    let directory = prompt(&format!("Download directory [{default_dir}]: "))?;
    let directory = if directory.is_empty() { default_dir } else { directory };

    let mut downloader = Downloader::new_empty()
        .with_destination_name(&directory)
        .accept_invalid_certs(true)
        .with_progress(Progress::default());
    for update in &selected {
        downloader = downloader.with_download(Download::try_from(update)?);
    }

    let outcomes = downloader.download_all().await.context("could not start downloads")?;
    report(&outcomes);
    Ok(())
}

fn select_updates(manifest: &Manifest) -> Result<Vec<UpdateDescriptor>> {
    loop {
        let input = prompt("Updates to download (numbers separated by spaces, or 'all') [all]: ")?;
        if input.is_empty() || input.eq_ignore_ascii_case("all") {
            return Ok(manifest.updates.clone());
        }
        match parse_selection(&input, manifest.updates.len()) {
            Some(indices) => return Ok(indices.into_iter().map(|index| manifest.updates[index].clone()).collect()),
            None => println!("Invalid selection. Enter numbers between 1 and {}.", manifest.updates.len()),
        }
    }
}

fn parse_selection(input: &str, count: usize) -> Option<Vec<usize>> {
    input
        .split_whitespace()
        .map(|token| {
            token
                .parse::<usize>()
                .ok()
                .filter(|number| (1..=count).contains(number))
                .map(|number| number - 1)
        })
        .collect()
}

fn report(outcomes: &[DownloadOutcome]) {
    let failed = outcomes.iter().filter(|outcome| !outcome.is_success()).count();
    println!();
    if failed == 0 {
        println!("Downloaded {} package(s). {INSTALL_HINT}", outcomes.len());
        return;
    }
    println!("Downloaded {} of {} package(s).", outcomes.len() - failed, outcomes.len());
    for outcome in outcomes {
        if let Err(error) = &outcome.status {
            println!("  failed: {} ({error})", outcome.url);
        }
    }
}

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::parse_selection;

    #[test]
    fn selection_accepts_in_range_numbers() {
        assert_eq!(parse_selection("1 3", 4), Some(vec![0, 2]));
    }

    #[test]
    fn selection_rejects_out_of_range_or_garbage() {
        assert_eq!(parse_selection("0", 4), None);
        assert_eq!(parse_selection("5", 4), None);
        assert_eq!(parse_selection("two", 4), None);
    }
}
