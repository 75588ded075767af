// src/directory.rs — Companion lookup and random matching

use crate::billing::CallKind;
use crate::infra::errors::DosttError;
use crate::storage::store::CompanionRow;

/// Uniform index in `0..len` from the OS random source.
fn random_index(len: usize) -> anyhow::Result<usize> {
    let mut buf = [0u8; 8];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow::anyhow!("random source failed: {e}"))?;
    Ok((u64::from_le_bytes(buf) % len as u64) as usize)
}

/// The companion with `id`, provided it is online.
pub fn find_online(companions: &[CompanionRow], id: i64) -> Result<&CompanionRow, DosttError> {
    let companion = companions
        .iter()
        .find(|c| c.id == id)
        .ok_or(DosttError::CompanionNotFound { companion_id: id })?;
    if !companion.is_online {
        return Err(DosttError::CompanionOffline {
            name: companion.name.clone(),
        });
    }
    Ok(companion)
}

pub fn online(companions: &[CompanionRow]) -> Vec<&CompanionRow> {
    companions.iter().filter(|c| c.is_online).collect()
}

/// Pick an online companion using `choose(n)`, which must return an index
/// below `n`.
pub fn pick_online_with(
    companions: &[CompanionRow],
    choose: impl FnOnce(usize) -> anyhow::Result<usize>,
) -> Result<&CompanionRow, DosttError> {
    let candidates = online(companions);
    if candidates.is_empty() {
        return Err(DosttError::NoOnlineCompanion);
    }
    let index = choose(candidates.len())?.min(candidates.len() - 1);
    Ok(candidates[index])
}

/// Uniformly random online companion.
pub fn pick_random_online(companions: &[CompanionRow]) -> Result<&CompanionRow, DosttError> {
    pick_online_with(companions, random_index)
}

/// Audio or video with equal odds.
pub fn random_kind() -> anyhow::Result<CallKind> {
    Ok(if random_index(2)? == 0 {
        CallKind::Audio
    } else {
        CallKind::Video
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn companion(id: i64, name: &str, online: bool) -> CompanionRow {
        CompanionRow {
            id,
            name: name.into(),
            age: 24,
            languages: "Hindi, English".into(),
            interests: "Music".into(),
            image_url: String::new(),
            is_online: online,
        }
    }

    fn roster() -> Vec<CompanionRow> {
        vec![
            companion(1, "Priya", true),
            companion(2, "Anjali", false),
            companion(3, "Riya", true),
        ]
    }

    #[test]
    fn test_find_online() {
        let all = roster();
        assert_eq!(find_online(&all, 3).unwrap().name, "Riya");
        assert!(matches!(
            find_online(&all, 2),
            Err(DosttError::CompanionOffline { .. })
        ));
        assert!(matches!(
            find_online(&all, 9),
            Err(DosttError::CompanionNotFound { companion_id: 9 })
        ));
    }

    #[test]
    fn test_pick_skips_offline() {
        let all = roster();
        let first = pick_online_with(&all, |_| Ok(0)).unwrap();
        let second = pick_online_with(&all, |n| Ok(n - 1)).unwrap();
        assert_eq!(first.name, "Priya");
        assert_eq!(second.name, "Riya");
    }

    #[test]
    fn test_pick_random_is_always_online() {
        let all = roster();
        for _ in 0..50 {
            assert!(pick_random_online(&all).unwrap().is_online);
        }
    }

    #[test]
    fn test_no_one_online() {
        let all = vec![companion(1, "Pooja", false)];
        assert!(matches!(
            pick_random_online(&all),
            Err(DosttError::NoOnlineCompanion)
        ));
    }

    #[test]
    fn test_random_kind_covers_both() {
        let kinds: std::collections::HashSet<_> =
            (0..200).map(|_| random_kind().unwrap()).collect();
        assert_eq!(kinds.len(), 2);
    }
}
