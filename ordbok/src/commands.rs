//! Command handlers for the `ordbok` binary

use anyhow::{bail, Context, Result};
use ordbok_lib::catalog::{DictionaryMeta, LangPair};
use ordbok_lib::downloader::{DownloadState, FetchProgress};
use ordbok_lib::state::AppState;
use ordbok_lib::util::{human_filesize, progress_percent};
use ordbok_lib::{OrdbokError, Session};
use tokio::sync::mpsc;

fn describe(meta: &DictionaryMeta) -> String {
    format!(
        "{}  {:>8} lemmas  {:>10}",
        meta.pair(),
        meta.lemmas,
        human_filesize(meta.compressed_size.unwrap_or(meta.size))
    )
}

/// Print catalog entries, optionally filtered by language
pub fn list(state: &AppState, from: Option<&str>, to: Option<&str>) {
    let metas = state.catalog.list(from, to);
    if metas.is_empty() {
        println!("No dictionaries match");
        return;
    }
    for meta in metas {
        println!("{}", describe(meta));
    }
}

/// Load `pair` (from cache or network) and print matches for `query`
pub async fn lookup(state: &AppState, pair: &str, query: &str, limit: usize) -> Result<()> {
    let pair: LangPair = pair.parse()?;
    let session = load_with_progress(state, &pair, false).await?;
    let hits = session.lookup(query, limit)?;
    if hits.is_empty() {
        println!("No matches for {:?}", query.trim());
    }
    for hit in hits {
        if hit.pos.is_empty() {
            println!("{}: {}", hit.word, hit.translations.join(", "));
        } else {
            println!("{} ({}): {}", hit.word, hit.pos, hit.translations.join(", "));
        }
    }
    Ok(())
}

/// Fetch `pair` from the server and store it for offline use
pub async fn download(state: &AppState, pair: &str) -> Result<()> {
    let pair: LangPair = pair.parse()?;
    let session = load_with_progress(state, &pair, true).await?;
    println!(
        "Saved {} ({} headwords) as {}",
        session.meta.pair(),
        session.trie().len(),
        session.meta.hash
    );
    Ok(())
}

/// Print dictionaries available offline
pub async fn saved(state: &AppState) -> Result<()> {
    let metas = state.cache().saved().await.context("Failed to read saved dictionaries")?;
    if metas.is_empty() {
        println!("No saved dictionaries");
    }
    for meta in metas {
        println!(
            "{}  {}  saved {}",
            describe(&meta),
            meta.hash,
            meta.date.as_deref().unwrap_or("?")
        );
    }
    Ok(())
}

/// Delete one saved dictionary by content hash
pub async fn delete(state: &AppState, hash: &str) -> Result<()> {
    state
        .cache()
        .delete(hash)
        .await
        .with_context(|| format!("Failed to delete dictionary {}", hash))?;
    println!("Deleted {}", hash);
    Ok(())
}

/// Delete every saved dictionary
pub async fn purge(state: &AppState) -> Result<()> {
    state.cache().purge().await.context("Failed to delete the dictionary store")?;
    println!("Deleted all saved dictionaries");
    Ok(())
}

/// Load a dictionary, printing download progress to stderr. Ctrl-C cancels the download.
async fn load_with_progress(state: &AppState, pair: &LangPair, force: bool) -> Result<Session> {
    let (progress_tx, mut progress_rx) = mpsc::channel::<FetchProgress>(100);

    let printer = tokio::spawn(async move {
        let mut last: Option<String> = None;
        while let Some(progress) = progress_rx.recv().await {
            let line = match (progress.state, progress.total) {
                (DownloadState::Downloading, Some(total)) => {
                    format!("{}%", progress_percent(progress.downloaded, total))
                }
                (DownloadState::Downloading, None) => human_filesize(progress.downloaded),
                (other, _) => format!("{:?}", other).to_lowercase(),
            };
            if last.as_ref() != Some(&line) {
                eprintln!("  {}", line);
                last = Some(line);
            }
        }
    });

    let loader = state.loader.clone();
    let result = {
        let load = async {
            if force {
                loader.download(pair, Some(&progress_tx)).await
            } else {
                loader.load(pair, Some(&progress_tx)).await
            }
        };
        tokio::pin!(load);
        loop {
            tokio::select! {
                result = &mut load => break result,
                _ = tokio::signal::ctrl_c() => {
                    if loader.cancel() {
                        eprintln!("Cancelling download...");
                    }
                }
            }
        }
    };
    drop(progress_tx);
    let _ = printer.await;

    match result {
        Ok(session) => Ok(session),
        Err(e) if e.is_cancelled() => bail!("Download cancelled"),
        Err(OrdbokError::Fetch(e)) => Err(e).with_context(|| format!("Could not download {}", pair)),
        Err(e) => Err(e).with_context(|| format!("Dictionary {} unavailable", pair)),
    }
}
