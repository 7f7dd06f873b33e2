//! `scalesim erlang-b`: size a loss system analytically.

use anyhow::{Result, bail};
use scalesim_autoscale::erlang::{erlang_b as blocking, min_servers_erlang_b};

/// Smallest VM count whose blocking stays under `target`, and the blocking
/// it achieves.
pub fn size(load: f64, target: f64, density: u32) -> Result<(u32, f64)> {
    if !(load.is_finite() && load >= 0.0) {
        bail!("load must be a non-negative number, got {load}");
    }
    if !(target > 0.0 && target < 1.0) {
        bail!("target must lie in (0, 1), got {target}");
    }
    if density == 0 {
        bail!("density must be at least 1");
    }
    let vms = min_servers_erlang_b(load, density, target)?;
    Ok((vms, blocking(load, vms * density)))
}

pub fn erlang_b(load: f64, target: f64, density: u32) -> Result<()> {
    let (vms, achieved) = size(load, target, density)?;
    println!("load:      {load} Erlangs");
    println!("target:    {target}");
    println!("vms:       {vms} ({} seats)", vms * density);
    println!("blocking:  {achieved:.6}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_single_seat_servers() {
        let (vms, achieved) = size(1.0, 0.02, 1).unwrap();
        assert_eq!(vms, 4);
        assert!(achieved <= 0.02);
    }

    #[test]
    fn packs_seats_into_vms() {
        let (single, _) = size(10.0, 0.01, 1).unwrap();
        let (packed, _) = size(10.0, 0.01, 4).unwrap();
        assert_eq!(packed, single.div_ceil(4));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(size(-1.0, 0.01, 1).is_err());
        assert!(size(1.0, 1.5, 1).is_err());
        assert!(size(1.0, 0.01, 0).is_err());
    }
}
