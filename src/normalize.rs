use std::fs::{File, OpenOptions};
use std::io::{BufRead as _, BufReader, Write};
use std::path::PathBuf;

use anyhow::Context as _;

use crate::cli::NormalizeArgs;
use crate::formats::TocInput;
use crate::toc::TocNormalizer;

pub fn run(args: NormalizeArgs) -> anyhow::Result<()> {
    let input_path = PathBuf::from(&args.input);
    let out_path = args.out.as_ref().map(PathBuf::from);
    if let Some(out_path) = &out_path
        && out_path.exists()
    {
        anyhow::bail!("normalize output already exists: {}", out_path.display());
    }

    let input = File::open(&input_path)
        .with_context(|| format!("open toc rows: {}", input_path.display()))?;
    let normalizer = TocNormalizer::new().context("compile title patterns")?;

    // Rows are pushed as they are read; the stream is never buffered whole.
    let mut state = normalizer.state();
    for (line_no, line) in BufReader::new(input).lines().enumerate() {
        let line = line.with_context(|| format!("read {}", input_path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let row: TocInput = serde_json::from_str(&line)
            .with_context(|| format!("parse row at {}:{}", input_path.display(), line_no + 1))?;
        state.push(row);
    }
    let normalized = state.finish();

    tracing::info!(
        parts = normalized.parts().count(),
        episodes = normalized.episodes().count(),
        anomalies = normalized.anomalies.len(),
        "normalized toc"
    );

    let contents = if args.flat {
        normalized.into_flat()
    } else {
        normalized.contents
    };

    match out_path {
        Some(out_path) => {
            let mut out = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&out_path)
                .with_context(|| format!("create output: {}", out_path.display()))?;
            write_contents(&mut out, &contents)?;
        }
        None => {
            let mut out = std::io::stdout().lock();
            write_contents(&mut out, &contents)?;
        }
    }

    Ok(())
}

fn write_contents<T: serde::Serialize>(out: &mut impl Write, contents: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, contents).context("serialize toc contents")?;
    out.write_all(b"\n").context("write trailing newline")?;
    out.flush().context("flush output")?;
    Ok(())
}
