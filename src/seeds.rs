//! DNS seed lists used by [`crate::introducer::IntroducerClient`] as a
//! fallback bootstrap when no introducer endpoint answers (update as seed
//! operators change).

/// Which seed list to use. Kept separate from any wire protocol's network
/// enum since this crate has no notion of chain parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTag {
    Main,
    Test,
}

pub fn dns_seeds(net: NetworkTag) -> &'static [&'static str] {
    match net {
        NetworkTag::Main => &[
            "seed.bitcoin.sipa.be",
            "dnsseed.bluematt.me",
            "dnsseed.bitcoin.dashjr.org",
            "seed.bitcoinstats.com",
            "seed.bitcoin.jonasschnelli.ch",
            "seed.btc.petertodd.org",
            "seed.bitcoin.sprovoost.nl",
            "dnsseed.emzy.de",
            "seed.bitcoin.wiz.biz",
        ],
        NetworkTag::Test => &[
            "testnet-seed.bitcoin.jonasschnelli.ch",
            "seed.tbtc.petertodd.org",
            "seed.testnet.bitcoin.sprovoost.nl",
        ],
    }
}
