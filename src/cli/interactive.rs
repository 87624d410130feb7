use std::io::{self, BufRead, Write};

use anyhow::{Result, anyhow};

/// Asks which bucket to work on. `Ok(None)` means the user backed out.
pub(crate) fn prompt_bucket(buckets: &[String]) -> Result<Option<usize>> {
    let mut stderr = io::stderr().lock();
    write!(
        stderr,
        "対象のバケットを番号または名前で選択してください（q で中止）: "
    )?;
    stderr.flush()?;

    let mut input = String::new();
    let mut stdin = io::stdin().lock();
    let n = stdin.read_line(&mut input)?;
    if n == 0 {
        return Ok(None);
    }
    parse_choice(&input, buckets)
}

pub(crate) fn parse_choice(input: &str, names: &[String]) -> Result<Option<usize>> {
    let s = input.trim();
    if names.is_empty() {
        return Ok(None);
    }

    match s.to_ascii_lowercase().as_str() {
        "" | "none" | "n" | "q" | "quit" | "キャンセル" | "中止" => return Ok(None),
        _ => {}
    }

    if let Some(idx) = names.iter().position(|name| name == s) {
        return Ok(Some(idx));
    }

    let max = names.len();
    let idx = s
        .parse::<usize>()
        .map_err(|_| anyhow!("選択が不正です: {s}（番号またはバケット名を入力してください）"))?;
    if idx == 0 {
        return Err(anyhow!("選択は1始まりです（0は指定できません）: {s}"));
    }
    if idx > max {
        return Err(anyhow!("選択が範囲外です（最大 {max}）: {s}"));
    }
    Ok(Some(idx - 1))
}

pub(crate) fn confirm_yes_no(prompt: &str) -> Result<bool> {
    let mut stderr = io::stderr().lock();
    write!(stderr, "{prompt}")?;
    stderr.flush()?;

    let mut input = String::new();
    let mut stdin = io::stdin().lock();
    let n = stdin.read_line(&mut input)?;
    if n == 0 {
        return Ok(false);
    }
    Ok(parse_yes_no(&input))
}

pub(crate) fn parse_yes_no(input: &str) -> bool {
    matches!(
        input.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "はい"
    )
}
