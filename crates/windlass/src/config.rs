use alloy::primitives::{address, b256, Address, B256};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RPC_URL: &str = "https://ethereum-rpc.publicnode.com";
pub const DEFAULT_CHAIN_ID: u64 = 1;

// Public mainnet infrastructure the tool can assume out of the box. Protocol
// deployment addresses have no defaults and must be configured.
const DEFAULT_LIDO_WITHDRAWAL_QUEUE: Address =
    address!("0x889edC2eDab5f40e902b864aD4d7AdE8E412F9B1");
const DEFAULT_ETHERFI_WITHDRAW_NFT: Address =
    address!("0x7d5706f6ef3F89B3951E23e557CDFBC3239D4E2c");
const DEFAULT_APR_ORACLE: Address = address!("0x1981AD9F44F2EA9aDd2dC4AD7D075c102C70aF92");
const DEFAULT_AAVE_POOL: Address = address!("0x87870Bca3F3fD6335C3F4ce8392D69350B4fA4E2");
const DEFAULT_MORPHO: Address = address!("0xBBBBBbbBBb9cC5e90e3b3Af64bdAF62C37EEFFCb");
const DEFAULT_WETH: Address = address!("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
const DEFAULT_WSTETH: Address = address!("0x7f39C581F595B53c5cb19bD0b3f8dA6c935E2Ca0");
const DEFAULT_WEETH: Address = address!("0xCd5fE23C85820F7B72D0926FC9b05b43E359b7ee");
const DEFAULT_MORPHO_WSTETH_MARKET_ID: B256 =
    b256!("0xb8fc70e82bc5bb53e773626fcc6a23f7eefa036918d7ef216ecfb1950a94a85e");
const DEFAULT_MORPHO_WEETH_MARKET_ID: B256 =
    b256!("0x37e7484d642d90f14451f1910ba4b7b8e4c3ccdd0ec28f8b2bdb35479e472ba7");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Primary Ethereum JSON-RPC endpoint.
    pub url: String,
    /// Additional endpoints tried in order when the primary fails.
    pub fallback_urls: Vec<String>,
    /// Expected chain id; a pass aborts early on a mismatch.
    pub chain_id: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_RPC_URL.into(),
            fallback_urls: vec![
                "https://eth.llamarpc.com".into(),
                "https://rpc.ankr.com/eth".into(),
            ],
            chain_id: DEFAULT_CHAIN_ID,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Default wallet used when a command omits `--wallet`.
    pub address: Option<Address>,
}

/// Protocol and venue deployment addresses. `None` is a first-class
/// "unconfigured" state; commands that need a slot refuse before any RPC
/// call and `doctor` prints the setup hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractsConfig {
    pub vault: Option<Address>,
    pub apr_oracle: Option<Address>,
    pub market: Option<Address>,
    /// Discovered from `market.POSITION_NFT()` when unset.
    pub position_nft: Option<Address>,
    pub wsteth_adapter: Option<Address>,
    pub weeth_adapter: Option<Address>,
    pub aave_receiver: Option<Address>,
    pub morpho_receiver: Option<Address>,
    pub aave_pool: Option<Address>,
    /// Skips the pool's addresses-provider hop when set.
    pub aave_data_provider: Option<Address>,
    pub morpho: Option<Address>,
    pub lido_withdrawal_queue: Option<Address>,
    pub etherfi_withdraw_nft: Option<Address>,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            vault: None,
            apr_oracle: Some(DEFAULT_APR_ORACLE),
            market: None,
            position_nft: None,
            wsteth_adapter: None,
            weeth_adapter: None,
            aave_receiver: None,
            morpho_receiver: None,
            aave_pool: Some(DEFAULT_AAVE_POOL),
            aave_data_provider: None,
            morpho: Some(DEFAULT_MORPHO),
            lido_withdrawal_queue: Some(DEFAULT_LIDO_WITHDRAWAL_QUEUE),
            etherfi_withdraw_nft: Some(DEFAULT_ETHERFI_WITHDRAW_NFT),
        }
    }
}

/// Token addresses, defaulting to mainnet canon. Override on forks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    pub weth: Option<Address>,
    pub wsteth: Option<Address>,
    pub weeth: Option<Address>,
    /// Aave interest-bearing wstETH; overrides reserve discovery when set.
    pub awsteth: Option<Address>,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            weth: Some(DEFAULT_WETH),
            wsteth: Some(DEFAULT_WSTETH),
            weeth: Some(DEFAULT_WEETH),
            awsteth: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketsConfig {
    pub morpho_wsteth_id: Option<B256>,
    pub morpho_weeth_id: Option<B256>,
}

impl Default for MarketsConfig {
    fn default() -> Self {
        Self {
            morpho_wsteth_id: Some(DEFAULT_MORPHO_WSTETH_MARKET_ID),
            morpho_weeth_id: Some(DEFAULT_MORPHO_WEETH_MARKET_ID),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WindlassConfig {
    pub rpc: RpcConfig,
    pub wallet: WalletConfig,
    pub contracts: ContractsConfig,
    pub tokens: TokensConfig,
    pub markets: MarketsConfig,
}

fn drop_zero(slot: &mut Option<Address>) {
    if slot.is_some_and(|a| a.is_zero()) {
        *slot = None;
    }
}

impl WindlassConfig {
    /// A pasted zero address means "unset", never a live contract.
    pub fn normalize(&mut self) {
        drop_zero(&mut self.wallet.address);
        let c = &mut self.contracts;
        for slot in [
            &mut c.vault,
            &mut c.apr_oracle,
            &mut c.market,
            &mut c.position_nft,
            &mut c.wsteth_adapter,
            &mut c.weeth_adapter,
            &mut c.aave_receiver,
            &mut c.morpho_receiver,
            &mut c.aave_pool,
            &mut c.aave_data_provider,
            &mut c.morpho,
            &mut c.lido_withdrawal_queue,
            &mut c.etherfi_withdraw_nft,
        ] {
            drop_zero(slot);
        }
        let t = &mut self.tokens;
        for slot in [&mut t.weth, &mut t.wsteth, &mut t.weeth, &mut t.awsteth] {
            drop_zero(slot);
        }
    }
}
