use clap::ValueEnum;

/// How straddling blocks are combined across ranks.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeChoice {
    /// Home rank below the cutoff, all-reduce above it
    Auto,
    /// Always route through the block's home rank
    Home,
    /// Always use the dense all-reduce
    Reduce,
}

/// Effective cutoff for the chosen exchange.
pub fn cutoff_for(choice: ExchangeChoice, cutoff: usize) -> usize {
    match choice {
        ExchangeChoice::Auto => cutoff,
        ExchangeChoice::Home => usize::MAX,
        ExchangeChoice::Reduce => 0,
    }
}
