/*
    Nyx, blazing fast astrodynamics
    Copyright (C) 2018-onwards Christopher Rabotin <christopher.rabotin@gmail.com>

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::geometry::{CompressedIndex, VolumeGrid};
use crate::rng::PrngStream;
use crate::sampler::{DrawnParams, WindVector};

/// On-disk realization cache: one whitespace-separated metadata line plus a
/// flat binary payload (spec.md §6): `<nn> <nelem> <nx> <ny> <nz> <delta_x>
/// <delta_y> <delta_z> <xstart> <ystart> <zstart> <maxdist> <wx> <wy> <wz>
/// <lmin> <lmax> <w> <wdir> <z0> <T0>`, followed by `nelem` little-endian
/// `i64` full indices and `nelem` little-endian `f64` realization values.
const METADATA_FIELDS: usize = 21;
const FLOAT_PRECISION: usize = 16;

fn metadata_path(cachedir: &str, stem: &str) -> PathBuf {
    Path::new(cachedir).join(format!("{stem}_metadata.txt"))
}

fn realization_path(cachedir: &str, stem: &str) -> PathBuf {
    Path::new(cachedir).join(format!("{stem}_realization.dat"))
}

/// Write the grid, drawn parameters, and realization to `cachedir`, keyed
/// by the PRNG stream that produced them.
pub fn save_realization(
    cachedir: &str,
    stream: &PrngStream,
    grid: &VolumeGrid,
    params: &DrawnParams,
    idx: &CompressedIndex,
    realization: &[f64],
) -> std::io::Result<()> {
    std::fs::create_dir_all(cachedir)?;
    let stem = stream.cache_stem();

    let meta = format!(
        "{nn:.prec$} {nelem:.prec$} {nx:.prec$} {ny:.prec$} {nz:.prec$} {dx:.prec$} {dy:.prec$} {dz:.prec$} {xs:.prec$} {ys:.prec$} {zs:.prec$} {maxdist:.prec$} {wx:.prec$} {wy:.prec$} {wz:.prec$} {lmin:.prec$} {lmax:.prec$} {w:.prec$} {wdir:.prec$} {z0:.prec$} {t0:.prec$}\n",
        nn = grid.nn as f64,
        nelem = idx.nelem() as f64,
        nx = grid.nx as f64,
        ny = grid.ny as f64,
        nz = grid.nz as f64,
        dx = grid.delta_x,
        dy = grid.delta_y,
        dz = grid.delta_z,
        xs = grid.xstart,
        ys = grid.ystart,
        zs = grid.zstart,
        maxdist = grid.maxdist,
        wx = grid.wind.wx,
        wy = grid.wind.wy,
        wz = grid.wind.wz,
        lmin = params.lmin,
        lmax = params.lmax,
        w = params.w,
        wdir = params.wdir,
        z0 = params.z0,
        t0 = params.t0,
        prec = FLOAT_PRECISION,
    );

    let mut meta_f = BufWriter::new(File::create(metadata_path(cachedir, &stem))?);
    meta_f.write_all(meta.as_bytes())?;

    let mut bin_f = BufWriter::new(File::create(realization_path(cachedir, &stem))?);
    for &i in &idx.full_index {
        bin_f.write_all(&i.to_le_bytes())?;
    }
    for &v in realization {
        bin_f.write_all(&v.to_le_bytes())?;
    }

    debug!("saved realization cache to {cachedir}/{stem}_{{metadata.txt,realization.dat}}");
    Ok(())
}

/// A loaded cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedRealization {
    pub grid_shape: (i64, i64, i64),
    pub nn: i64,
    pub wind: WindVector,
    pub params_subset: (f64, f64, f64, f64, f64, f64),
    pub full_index: Vec<i64>,
    pub realization: Vec<f64>,
}

/// Load a cache entry, or `None` if it is missing or structurally corrupt
/// (spec.md §6: a cache miss or corrupt entry is always handled internally
/// by triggering a rebuild, never surfaced as an error to the caller).
pub fn load_realization(cachedir: &str, stream: &PrngStream) -> Option<CachedRealization> {
    let stem = stream.cache_stem();
    let meta_path = metadata_path(cachedir, &stem);
    let bin_path = realization_path(cachedir, &stem);

    let meta_f = File::open(&meta_path).ok()?;
    let mut line = String::new();
    BufReader::new(meta_f).read_line(&mut line).ok()?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != METADATA_FIELDS {
        warn!(
            "cache metadata at {} has {} fields, expected {METADATA_FIELDS}; treating as a miss",
            meta_path.display(),
            fields.len()
        );
        return None;
    }

    let parsed: Option<Vec<f64>> = fields.iter().map(|s| s.parse::<f64>().ok()).collect();
    let parsed = parsed?;

    let nn = parsed[0] as i64;
    let nelem = parsed[1] as usize;
    let nx = parsed[2] as i64;
    let ny = parsed[3] as i64;
    let nz = parsed[4] as i64;
    let wx = parsed[12];
    let wy = parsed[13];
    let wz = parsed[14];
    let (lmin, lmax, w, wdir, z0, t0) = (
        parsed[15], parsed[16], parsed[17], parsed[18], parsed[19], parsed[20],
    );

    let mut bin_f = BufReader::new(File::open(&bin_path).ok()?);

    let mut full_index = Vec::with_capacity(nelem);
    let mut buf8 = [0_u8; 8];
    for _ in 0..nelem {
        if bin_f.read_exact(&mut buf8).is_err() {
            warn!("cache payload at {} truncated in index section", bin_path.display());
            return None;
        }
        full_index.push(i64::from_le_bytes(buf8));
    }

    let mut realization = Vec::with_capacity(nelem);
    for _ in 0..nelem {
        if bin_f.read_exact(&mut buf8).is_err() {
            warn!("cache payload at {} truncated in realization section", bin_path.display());
            return None;
        }
        realization.push(f64::from_le_bytes(buf8));
    }

    // Any trailing bytes mean the payload does not match its own metadata.
    let mut trailing = [0_u8; 1];
    if bin_f.read(&mut trailing).ok()? != 0 {
        warn!("cache payload at {} has trailing data; treating as corrupt", bin_path.display());
        return None;
    }

    Some(CachedRealization {
        grid_shape: (nx, ny, nz),
        nn,
        wind: WindVector { wx, wy, wz },
        params_subset: (lmin, lmax, w, wdir, z0, t0),
        full_index,
        realization,
    })
}
