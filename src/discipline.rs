/// How the free list is searched / popped on check-out.
///
/// `Lifo` maximises cache warmth: the most recently returned item is the
/// most likely to still have warm OS/driver-side caches, so it's reused
/// first. `Fifo` maximises fairness across entries. `Random` is for
/// load-distribution experiments across a backing fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessDiscipline {
    #[default]
    Lifo,
    Fifo,
    Random,
}

impl std::str::FromStr for AccessDiscipline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lifo" => Ok(AccessDiscipline::Lifo),
            "fifo" => Ok(AccessDiscipline::Fifo),
            "random" => Ok(AccessDiscipline::Random),
            other => Err(format!("unknown access discipline '{other}'")),
        }
    }
}
