use ixp::Stat;

/// One line of a long listing: mode, owner, group, size, mtime and name.
pub fn ls_line(stat: &Stat) -> String {
    let suffix = if stat.is_dir() { "/" } else { "" };
    format!(
        "{} {} {} {:>8} {:>10} {}{}",
        stat.mode_str(),
        stat.uid,
        stat.gid,
        stat.length,
        stat.mtime,
        stat.name,
        suffix
    )
}

/// Sort entries by name, the way `ls` lists them.
pub fn sorted(mut entries: Vec<Stat>) -> Vec<Stat> {
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries
}
