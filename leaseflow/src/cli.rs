use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "leaseflow")]
#[command(bin_name = "leaseflow")]
pub struct Cli {
    #[command(subcommand)]
    pub commands: Commands,
}

impl Cli {
    pub fn version(&self) -> bool {
        matches!(self.commands, Commands::Version)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run several hosts in this process against a shared in-memory lease
    /// container and a synthetic change feed.
    Simulate {
        #[arg(long, env = "LEASEFLOW_HOSTS", default_value = "3")]
        hosts: usize,

        #[arg(long, env = "LEASEFLOW_PARTITIONS", default_value = "8")]
        partitions: usize,

        #[arg(long = "items-per-partition", default_value = "1000")]
        items_per_partition: u64,

        /// Stop after this many seconds, or on ctrl-c.
        #[arg(long = "duration-secs", default_value = "30")]
        duration_secs: u64,

        #[arg(long = "max-item-count")]
        max_item_count: Option<u32>,

        /// Checkpoint after this many batches instead of after every batch.
        #[arg(long = "checkpoint-every")]
        checkpoint_every: Option<u64>,
    },
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulate_defaults() {
        let cli = Cli::try_parse_from(["leaseflow", "simulate", "--hosts", "2"]).unwrap();
        match cli.commands {
            Commands::Simulate {
                hosts,
                partitions,
                items_per_partition,
                max_item_count,
                ..
            } => {
                assert_eq!(hosts, 2);
                assert_eq!(partitions, 8);
                assert_eq!(items_per_partition, 1000);
                assert_eq!(max_item_count, None);
            }
            Commands::Version => panic!("expected simulate"),
        }
        assert!(!cli.version());
    }
}
