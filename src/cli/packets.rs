use std::collections::BTreeMap;

use anyhow::Result;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::command::{Cli, PacketsArgs};
use crate::input::InputReader;
use mpegh::structs::packet::{Packet, PacketType, PacketWalker};
use mpegh::utils::errors::{ErrorCode, classify};

const CHUNK_SIZE: usize = 64 * 1024;

pub fn cmd_packets(args: &PacketsArgs, cli: &Cli, multi: Option<&MultiProgress>) -> Result<()> {
    log::info!("Listing MHAS packets: {}", args.input.display());

    let mut input_reader = InputReader::new(&args.input)?;

    let pb = match multi {
        Some(multi) => {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
            pb.enable_steady_tick(std::time::Duration::from_millis(100));
            pb.set_message("Walking packets...");
            Some(pb)
        }
        None => None,
    };

    let mut lister = Lister::new(args);

    println!("{:>12}  {:<16} {:>6} {:>8}", "OFFSET", "TYPE", "LABEL", "LENGTH");

    input_reader.process_chunks(CHUNK_SIZE, |chunk| {
        lister.pending.extend_from_slice(chunk);
        let more = lister.walk(cli.strict)?;

        if let Some(ref pb) = pb {
            pb.set_message(format!("{} packets", lister.total));
        }

        Ok(more)
    })?;

    if let Some(ref pb) = pb {
        pb.finish_and_clear();
    }

    if !lister.pending.is_empty() && lister.limit.is_none_or(|limit| lister.total < limit) {
        log::warn!(
            "Truncated packet at offset {} ({} trailing bytes)",
            lister.base,
            lister.pending.len()
        );
    }

    lister.display_counts();

    Ok(())
}

struct Lister {
    /// Bytes not yet walked, starting at a packet boundary.
    pending: Vec<u8>,
    /// Stream offset of `pending[0]`.
    base: u64,
    packet_type: Option<PacketType>,
    limit: Option<usize>,
    total: usize,
    counts: BTreeMap<String, usize>,
}

impl Lister {
    fn new(args: &PacketsArgs) -> Self {
        Self {
            pending: Vec::with_capacity(2 * CHUNK_SIZE),
            base: 0,
            packet_type: args.packet_type.map(PacketType::from),
            limit: args.limit,
            total: 0,
            counts: BTreeMap::new(),
        }
    }

    /// Lists the complete packets in `pending`. Returns `false` once the
    /// packet limit is reached or the stream cannot be walked further.
    fn walk(&mut self, strict: bool) -> Result<bool> {
        let data = std::mem::take(&mut self.pending);
        let mut walker = PacketWalker::new(&data);
        let mut more = true;

        while let Some(packet) = walker.next() {
            match packet {
                Ok(packet) => {
                    if !self.list(&packet) {
                        more = false;
                        break;
                    }
                }
                Err(e) if classify(&e) == ErrorCode::NotEnoughBits => break,
                Err(e) => {
                    if strict {
                        return Err(e);
                    }
                    log::warn!("Packet at offset {}: {e}", self.base + walker.offset() as u64);
                    more = false;
                    break;
                }
            }
        }

        let consumed = walker.offset();
        self.base += consumed as u64;
        self.pending = data[consumed..].to_vec();

        Ok(more)
    }

    fn list(&mut self, packet: &Packet) -> bool {
        let header = &packet.header;
        *self.counts.entry(header.packet_type.to_string()).or_default() += 1;

        if self.packet_type.is_some_and(|t| t != header.packet_type) {
            return true;
        }

        let sync = if header.packet_type == PacketType::Sync
            && header.validate_sync(packet.payload).is_err()
        {
            " (invalid)"
        } else {
            ""
        };

        println!(
            "{:>12}  {:<16} {:>6} {:>8}{sync}",
            self.base + packet.offset as u64,
            header.packet_type.to_string(),
            header.label,
            header.length,
        );

        self.total += 1;
        self.limit.is_none_or(|limit| self.total < limit)
    }

    fn display_counts(&self) {
        println!();
        println!("Packet Summary");
        for (packet_type, count) in &self.counts {
            println!("  {packet_type:<24}  {count}");
        }
        println!();
    }
}
