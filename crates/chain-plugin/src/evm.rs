// OTC Broker Engine
// Copyright (C) 2026 OTC Broker Engine contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! EVM-family [`ChainPlugin`] implementation, built on `alloy`.
//!
//! Covers Ethereum, Polygon and any other chain whose broker/escrow
//! contracts follow the interfaces in [`crate::abi`]. Multiple RPC
//! endpoints are pooled through [`crate::pool::ProviderPool`]; deposit
//! scanning for ERC-20 assets uses `eth_getLogs` directly, falling back to
//! the configured block explorer for the bulk historical scans the txid
//! resolver needs (spec §4.7).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_json_abi::Event;
use alloy_network::EthereumWallet;
use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types::{BlockNumberOrTag, Filter};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use foundry_block_explorers::Client as ExplorerClient;
use otc_common::error::{BrokerError, BrokerResult};
use otc_common::types::{DealId, EscrowAccountRef, Side};
use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use crate::abi::{IBroker, IERC20};
use crate::pool::ProviderPool;
use crate::trait_::{
    ChainPlugin, ConfirmedDeposits, ObservedDeposit, PriceQuote, SubmitOutcome, SubmitRequest,
    TransferEvent,
};

/// Gas units an ERC-20 `approve` call costs, for the Recovery Manager's
/// gas-funding estimate (spec §4.5 step 1).
const APPROVE_GAS_UNITS: u128 = 60_000;

/// Gas units a plain native transfer costs, for the Recovery Manager's
/// refund-cost estimate (spec §4.4 phase 4 `estimatedRefundCost`).
const TRANSFER_GAS_UNITS: u128 = 21_000;

/// Safety margin applied over the raw gas-unit estimate (spec §4.5 "fixed
/// safe margin").
const GAS_ESTIMATE_SAFETY_MARGIN: f64 = 1.5;

/// Configuration needed to construct an [`EvmChainPlugin`].
#[derive(Debug, Clone)]
pub struct EvmChainConfig {
    /// Chain identifier, e.g. `"ETH"`, `"POLYGON"`.
    pub chain_id: String,
    /// RPC endpoint URLs.
    pub rpc_urls: Vec<String>,
    /// Confirmations required for a deposit/transaction to count as confirmed.
    pub confirmation_threshold: u64,
    /// The shared broker contract address.
    pub broker_address: String,
    /// Operator address, if this chain has operator-signed calls.
    pub operator_address: Option<String>,
    /// Gas-tank wallet address, if gas-funding (spec §4.5) is configured.
    pub tank_address: Option<String>,
    /// Hot-wallet seed used to deterministically derive escrow keys.
    pub hot_wallet_seed: String,
    /// The operator's raw signing key material (hex), used to produce the
    /// EIP-191 signature over native broker calls. A reference, not held
    /// beyond process memory; in production this is backed by a KMS/HSM and
    /// this field instead names a key reference the signer resolves.
    pub operator_signing_key_hex: Option<String>,
    /// Block explorer API key for bulk historical scans.
    pub explorer_api_key: Option<String>,
    /// Numeric chain id for the block explorer client (e.g. 1 for mainnet).
    pub explorer_chain_id: u64,
    /// Gas-price circuit-breaker ceiling, in gwei (spec §7 `CircuitBreakerTripped`).
    pub gas_ceiling_gwei: f64,
}

/// EVM-family chain plugin (spec §4.1), backed by a pool of JSON-RPC endpoints.
#[derive(Debug)]
pub struct EvmChainPlugin {
    cfg: EvmChainConfig,
    pool: Arc<ProviderPool>,
    explorer: Option<ExplorerClient>,
}

impl EvmChainPlugin {
    /// Build a plugin from `cfg`, probing every configured RPC endpoint.
    pub async fn new(cfg: EvmChainConfig) -> eyre::Result<Self> {
        let pool = Arc::new(ProviderPool::new(cfg.rpc_urls.clone(), 3).await?);
        let explorer = match &cfg.explorer_api_key {
            Some(key) => Some(
                ExplorerClient::builder()
                    .chain(cfg.explorer_chain_id.into())?
                    .with_api_key(key.clone())
                    .build()?,
            ),
            None => None,
        };
        Ok(Self { cfg, pool, explorer })
    }

    async fn provider_url(&self) -> BrokerResult<String> {
        self.pool
            .pick()
            .await
            .ok_or_else(|| BrokerError::Plugin(format!("no healthy RPC endpoint for {}", self.cfg.chain_id)))
    }

    async fn connect(&self) -> BrokerResult<impl Provider + Clone> {
        let url = self.provider_url().await?;
        let provider = ProviderBuilder::new()
            .connect(&url)
            .await
            .map_err(|e| BrokerError::Plugin(format!("connect to {url}: {e}")))?;
        Ok(provider)
    }

    /// Derive a deterministic 32-byte signing key for `(deal_id, side)` from
    /// the hot-wallet seed, without any shared in-process key material
    /// beyond the seed itself. Mirrors the BIP-32-style "same (dealId,
    /// party) always yields the same address" guarantee from spec §4.1
    /// using a keccak-based KDF rather than a full HD-wallet derivation,
    /// since the seed is opaque configuration, not a BIP-39 mnemonic.
    fn derive_signer(&self, deal_id: DealId, side: Side) -> BrokerResult<(PrivateKeySigner, u64)> {
        let index = derivation_index(deal_id, side);
        let mut preimage = Vec::with_capacity(self.cfg.hot_wallet_seed.len() + 16);
        preimage.extend_from_slice(self.cfg.hot_wallet_seed.as_bytes());
        preimage.extend_from_slice(&index.to_be_bytes());
        let key_bytes = keccak256(&preimage);
        let signer = PrivateKeySigner::from_bytes(&key_bytes)
            .map_err(|e| BrokerError::Plugin(format!("derive escrow key: {e}")))?;
        Ok((signer, index))
    }

    fn parse_address(s: &str) -> BrokerResult<Address> {
        Address::from_str(s).map_err(|e| BrokerError::Plugin(format!("invalid address {s}: {e}")))
    }

    fn keccak_deal_id(&self, deal_id: DealId) -> [u8; 32] {
        // spec §6: "a deal is uniquely identified on-chain by
        // keccak256(escrowAddress || chainId)"; we additionally key on the
        // off-chain deal id so the broker's own idempotency check
        // (`processedDeals`) lines up with the escrow the call concerns.
        let mut preimage = Vec::with_capacity(16 + self.cfg.chain_id.len());
        preimage.extend_from_slice(deal_id.0.as_bytes());
        preimage.extend_from_slice(self.cfg.chain_id.as_bytes());
        keccak256(&preimage).into()
    }

    fn amount_to_wei(amount: Decimal) -> BrokerResult<U256> {
        let scaled = (amount * Decimal::from(1_000_000_000_000_000_000u64))
            .round()
            .to_string();
        U256::from_str(&scaled).map_err(|e| BrokerError::Plugin(format!("amount to wei: {e}")))
    }

    fn wei_to_decimal(wei: U256) -> Decimal {
        let as_str = wei.to_string();
        Decimal::from_str(&as_str).unwrap_or_default() / Decimal::from(1_000_000_000_000_000_000u64)
    }

    /// Resolve a settlement call's `(payback, recipient, feeRecipient)`
    /// triple from `request`, falling back to `to_addr` for `recipient` and
    /// to `recipient` for `payback` when a revert carries no distinct
    /// payback (everything returns to the one refund address).
    fn settlement_addresses(&self, request: &SubmitRequest) -> BrokerResult<(Address, Address, Address)> {
        let recipient = Self::parse_address(request.recipient.as_deref().unwrap_or(&request.to_addr))?;
        let payback = match &request.payback {
            Some(addr) => Self::parse_address(addr)?,
            None => recipient,
        };
        let fee_recipient = match &request.fee_recipient {
            Some(addr) => Self::parse_address(addr)?,
            None => recipient,
        };
        Ok((payback, recipient, fee_recipient))
    }

    /// Produce the EIP-191-prefixed operator ECDSA signature the broker's
    /// `swapNative`/`revertNative` require (spec §6): a signature over
    /// `{contractAddress, dealId, payback, recipient, feeRecipient, amount,
    /// fees, msg.sender}`, where `msg.sender` is `escrow` — the address that
    /// will actually submit the call on-chain (the escrow's own derived key,
    /// not the operator's), since the escrow relays the operator-signed call.
    #[allow(clippy::too_many_arguments)]
    fn sign_operator_call(
        &self,
        contract_address: Address,
        deal_id: [u8; 32],
        payback: Address,
        recipient: Address,
        fee_recipient: Address,
        amount: U256,
        fees: U256,
        escrow: Address,
    ) -> BrokerResult<Vec<u8>> {
        let key_hex = self.cfg.operator_signing_key_hex.as_deref().ok_or_else(|| {
            BrokerError::UnauthorizedOperator(format!(
                "no operator signing key configured for chain {}",
                self.cfg.chain_id
            ))
        })?;
        let operator = PrivateKeySigner::from_str(key_hex.trim_start_matches("0x"))
            .map_err(|e| BrokerError::UnauthorizedOperator(format!("invalid operator key: {e}")))?;

        let encoded = (
            contract_address,
            alloy_primitives::FixedBytes::<32>::from(deal_id),
            payback,
            recipient,
            fee_recipient,
            amount,
            fees,
            escrow,
        )
            .abi_encode();
        let digest = keccak256(encoded);

        // EIP-191 "personal_sign" prefix over the 32-byte digest.
        let mut prefixed = Vec::with_capacity(32 + 26);
        prefixed.extend_from_slice(b"\x19Ethereum Signed Message:\n32");
        prefixed.extend_from_slice(digest.as_slice());
        let prefixed_hash = keccak256(&prefixed);

        let signature = operator
            .sign_hash_sync(&prefixed_hash)
            .map_err(|e| BrokerError::UnauthorizedOperator(format!("operator signature failed: {e}")))?;
        Ok(signature.as_bytes().to_vec())
    }
}

/// An asset looks like an ERC-20 contract if it is a `0x`-prefixed 40-hex-digit
/// address; anything else (a bare symbol like `"ETH"`) is native. Mirrors
/// `otc_engine::deal_engine`'s private helper of the same name, duplicated
/// here since this plugin has no dependency on `otc-engine`.
fn is_erc20_asset(asset: &str) -> bool {
    asset.len() == 42 && asset.starts_with("0x") && asset[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// The derivation index used for `(deal_id, side)`: the low 64 bits of
/// `keccak256(deal_id || side)`, deterministic and collision-free in
/// practice across the lifetime of a single deal.
fn derivation_index(deal_id: DealId, side: Side) -> u64 {
    let mut preimage = Vec::with_capacity(17);
    preimage.extend_from_slice(deal_id.0.as_bytes());
    preimage.push(match side {
        Side::A => 0,
        Side::B => 1,
    });
    let digest = keccak256(&preimage);
    u64::from_be_bytes(digest[0..8].try_into().expect("8 bytes"))
}

#[async_trait]
impl ChainPlugin for EvmChainPlugin {
    fn chain_id(&self) -> &str {
        &self.cfg.chain_id
    }

    #[instrument(skip(self), fields(chain = %self.cfg.chain_id))]
    async fn derive_escrow(&self, deal_id: DealId, side: Side) -> BrokerResult<EscrowAccountRef> {
        let (signer, index) = self.derive_signer(deal_id, side)?;
        Ok(EscrowAccountRef { address: signer.address().to_string(), derivation_index: index })
    }

    async fn list_confirmed_deposits(
        &self,
        asset: &str,
        address: &str,
        min_confirmations: u64,
    ) -> BrokerResult<ConfirmedDeposits> {
        let provider = self.connect().await?;
        let latest = provider
            .get_block_number()
            .await
            .map_err(|e| BrokerError::Plugin(format!("get_block_number: {e}")))?;

        if asset.eq_ignore_ascii_case("native") || asset.is_empty() {
            // The chain only exposes a current balance for native assets, so
            // a single synthetic deposit stands in for "everything received
            // so far" until a future scan resolves it to individual
            // transfers (spec §3 "synthetic flag").
            let addr = Self::parse_address(address)?;
            let balance = provider
                .get_balance(addr)
                .await
                .map_err(|e| BrokerError::Plugin(format!("get_balance: {e}")))?;
            let amount = Self::wei_to_decimal(balance);
            if amount.is_zero() {
                return Ok(ConfirmedDeposits { deposits: vec![], total_confirmed: Decimal::ZERO });
            }
            let deposit = ObservedDeposit {
                tx_id: format!("native-balance-{address}"),
                amount,
                block_height: latest,
                confirmations: min_confirmations,
                synthetic: true,
            };
            return Ok(ConfirmedDeposits { total_confirmed: amount, deposits: vec![deposit] });
        }

        let token = Self::parse_address(asset)?;
        let to = Self::parse_address(address)?;
        let from_block = latest.saturating_sub(50_000);
        let events = self.resolve_transfer_events(asset, address, from_block, latest).await?;
        let mut deposits = Vec::with_capacity(events.len());
        let mut total_confirmed = Decimal::ZERO;
        for event in events {
            let confirmations = latest.saturating_sub(event.block_number) + 1;
            if confirmations >= min_confirmations {
                total_confirmed += event.amount;
            }
            deposits.push(ObservedDeposit {
                tx_id: event.tx_hash,
                amount: event.amount,
                block_height: event.block_number,
                confirmations,
                synthetic: false,
            });
        }
        debug!(%token, %to, count = deposits.len(), "listed erc20 deposits");
        Ok(ConfirmedDeposits { deposits, total_confirmed })
    }

    async fn resolve_transfer_events(
        &self,
        asset: &str,
        address: &str,
        from_block: u64,
        to_block: u64,
    ) -> BrokerResult<Vec<TransferEvent>> {
        let provider = self.connect().await?;
        let token = Self::parse_address(asset)?;
        let to = Self::parse_address(address)?;

        let transfer_event = Event::parse("event Transfer(address indexed from, address indexed to, uint256 value)")
            .map_err(|e| BrokerError::Plugin(format!("parse Transfer event: {e}")))?;

        let filter = Filter::new()
            .address(token)
            .event_signature(transfer_event.selector())
            .topic2(to.into_word())
            .from_block(BlockNumberOrTag::Number(from_block))
            .to_block(BlockNumberOrTag::Number(to_block));

        let logs = provider
            .get_logs(&filter)
            .await
            .map_err(|e| BrokerError::Plugin(format!("get_logs: {e}")))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let Some(tx_hash) = log.transaction_hash else { continue };
            let Some(block_number) = log.block_number else { continue };
            let log_index = log.log_index.unwrap_or(0);
            let amount = U256::from_be_slice(log.data().data.as_ref());
            events.push(TransferEvent {
                tx_hash: format!("{tx_hash:#x}"),
                log_index,
                block_number,
                to: address.to_string(),
                amount: Self::wei_to_decimal(amount),
            });
        }
        Ok(events)
    }

    async fn get_tx_confirmations(&self, tx_id: &str) -> BrokerResult<i64> {
        let provider = self.connect().await?;
        let hash = tx_id
            .parse()
            .map_err(|e| BrokerError::Plugin(format!("invalid tx hash {tx_id}: {e}")))?;

        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| BrokerError::Plugin(format!("get_transaction_receipt: {e}")))?;

        let Some(receipt) = receipt else {
            // Not found: may still be propagating, or reorged away. The
            // dispatcher distinguishes "not found yet" from "found and
            // reverted" by stall window, not by this return value alone.
            return Ok(0);
        };

        if !receipt.status() {
            return Ok(-1);
        }

        let latest = provider
            .get_block_number()
            .await
            .map_err(|e| BrokerError::Plugin(format!("get_block_number: {e}")))?;
        let confirmations = latest.saturating_sub(receipt.block_number.unwrap_or(latest)) + 1;
        Ok(confirmations as i64)
    }

    async fn get_tx_gas_used(&self, tx_id: &str) -> BrokerResult<Option<u64>> {
        let provider = self.connect().await?;
        let hash = tx_id
            .parse()
            .map_err(|e| BrokerError::Plugin(format!("invalid tx hash {tx_id}: {e}")))?;
        let receipt = provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| BrokerError::Plugin(format!("get_transaction_receipt: {e}")))?;
        Ok(receipt.map(|r| r.gas_used))
    }

    fn get_confirmation_threshold(&self) -> u64 {
        self.cfg.confirmation_threshold
    }

    #[instrument(skip(self, request), fields(chain = %self.cfg.chain_id, purpose = %request.purpose))]
    async fn submit(&self, request: &SubmitRequest) -> BrokerResult<SubmitOutcome> {
        let gas_price = match request.gas_price_hint {
            Some(hint) => hint,
            None => self.current_gas_price().await?,
        };
        let ceiling_wei = (self.cfg.gas_ceiling_gwei * 1e9) as u128;
        if gas_price > ceiling_wei {
            return Err(BrokerError::CircuitBreakerTripped {
                chain: self.cfg.chain_id.clone(),
                gwei: gas_price as f64 / 1e9,
            });
        }

        let (signer, _) = self.derive_signer(request.deal_id, request.side.unwrap_or(Side::A))?;
        let wallet = EthereumWallet::from(signer.clone());
        let url = self.provider_url().await?;
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect(&url)
            .await
            .map_err(|e| BrokerError::Plugin(format!("connect with wallet: {e}")))?;

        let nonce = match request.original_nonce {
            Some(n) => n,
            None => provider
                .get_transaction_count(signer.address())
                .await
                .map_err(|e| BrokerError::Plugin(format!("get_transaction_count: {e}")))?,
        };

        let amount_wei = Self::amount_to_wei(request.amount)?;
        let fees_wei = Self::amount_to_wei(request.fees.unwrap_or(Decimal::ZERO))?;
        let broker = Self::parse_address(&self.cfg.broker_address)?;
        let deal_id_bytes = self.keccak_deal_id(request.deal_id);

        let (to, value_wei, calldata): (Address, U256, Bytes) = match request.purpose.as_str() {
            "APPROVE_BROKER" => {
                let token = Self::parse_address(&request.asset)?;
                (token, U256::ZERO, IERC20::approveCall { spender: broker, amount: amount_wei }.abi_encode().into())
            }
            "BROKER_SWAP" => {
                let token = Self::parse_address(&request.asset)?;
                let escrow = Self::parse_address(&request.from_addr)?;
                let (payback, recipient, fee_recipient) = self.settlement_addresses(request)?;
                let call = IBroker::swapERC20Call {
                    dealId: deal_id_bytes.into(),
                    token,
                    escrow,
                    payback,
                    recipient,
                    feeRecipient: fee_recipient,
                    amount: amount_wei,
                    fees: fees_wei,
                };
                (broker, U256::ZERO, call.abi_encode().into())
            }
            "PHASE_1_SWAP" => {
                let (payback, recipient, fee_recipient) = self.settlement_addresses(request)?;
                let operator_sig = self.sign_operator_call(
                    broker, deal_id_bytes, payback, recipient, fee_recipient, amount_wei, fees_wei,
                    signer.address(),
                )?;
                let call = IBroker::swapNativeCall {
                    dealId: deal_id_bytes.into(),
                    payback,
                    recipient,
                    feeRecipient: fee_recipient,
                    amount: amount_wei,
                    fees: fees_wei,
                    operatorSig: operator_sig.into(),
                };
                (broker, amount_wei + fees_wei, call.abi_encode().into())
            }
            "BROKER_REVERT" if is_erc20_asset(&request.asset) => {
                let token = Self::parse_address(&request.asset)?;
                let escrow = Self::parse_address(&request.from_addr)?;
                let payback = Self::parse_address(
                    request.payback.as_deref().unwrap_or(&request.to_addr),
                )?;
                let call = IBroker::revertERC20Call {
                    dealId: deal_id_bytes.into(),
                    token,
                    escrow,
                    payback,
                    amount: amount_wei,
                };
                (broker, U256::ZERO, call.abi_encode().into())
            }
            "BROKER_REVERT" => {
                let (payback, recipient, fee_recipient) = self.settlement_addresses(request)?;
                let operator_sig = self.sign_operator_call(
                    broker, deal_id_bytes, payback, recipient, fee_recipient, amount_wei, fees_wei,
                    signer.address(),
                )?;
                let call = IBroker::revertNativeCall {
                    dealId: deal_id_bytes.into(),
                    payback,
                    recipient,
                    feeRecipient: fee_recipient,
                    amount: amount_wei,
                    fees: fees_wei,
                    operatorSig: operator_sig.into(),
                };
                (broker, amount_wei, call.abi_encode().into())
            }
            // GAS_FUNDING, SURPLUS_REFUND, GAS_REFUND_TO_TANK, ADMIN_SPEND: a
            // plain value transfer to `to_addr`, no contract call involved.
            _ => (Self::parse_address(&request.to_addr)?, amount_wei, Bytes::new()),
        };

        let tx = alloy_rpc_types::TransactionRequest::default()
            .to(to)
            .value(value_wei)
            .input(calldata.into())
            .nonce(nonce)
            .gas_price(gas_price);

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(|e| classify_send_error(e.to_string()))?;
        let tx_id = format!("{:#x}", pending.tx_hash());
        Ok(SubmitOutcome { tx_id, nonce, gas_price })
    }

    async fn check_broker_approval(&self, escrow_addr: &str, token_addr: &str) -> BrokerResult<bool> {
        let provider = self.connect().await?;
        let token = Self::parse_address(token_addr)?;
        let owner = Self::parse_address(escrow_addr)?;
        let broker = Self::parse_address(&self.cfg.broker_address)?;
        let contract = IERC20::new(token, &provider);
        let allowance = contract
            .allowance(owner, broker)
            .call()
            .await
            .map_err(|e| BrokerError::Plugin(format!("allowance call: {e}")))?;
        Ok(allowance > U256::ZERO)
    }

    async fn approve_broker_for_erc20(
        &self,
        escrow: &EscrowAccountRef,
        token_addr: &str,
    ) -> BrokerResult<SubmitOutcome> {
        let request = SubmitRequest {
            deal_id: DealId::new(),
            side: None,
            from_addr: escrow.address.clone(),
            to_addr: token_addr.to_string(),
            asset: token_addr.to_string(),
            amount: Decimal::MAX,
            original_nonce: None,
            gas_price_hint: None,
            purpose: "APPROVE_BROKER".to_string(),
            payback: None,
            recipient: None,
            fee_recipient: None,
            fees: None,
        };
        self.submit(&request).await
    }

    async fn quote_native_for_usd(&self) -> BrokerResult<PriceQuote> {
        #[derive(serde::Deserialize)]
        struct CoingeckoResponse {
            #[serde(flatten)]
            prices: std::collections::HashMap<String, std::collections::HashMap<String, f64>>,
        }

        let coin_id = match self.cfg.chain_id.as_str() {
            "ETH" | "ARBITRUM" | "OPTIMISM" | "BASE" => "ethereum",
            "POLYGON" => "matic-network",
            other => other.to_lowercase().leak(),
        };
        let url = format!(
            "https://api.coingecko.com/api/v3/simple/price?ids={coin_id}&vs_currencies=usd"
        );
        let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()
            .map_err(|e| BrokerError::NoPriceOracle(e.to_string()))?;
        let response: CoingeckoResponse = client
            .get(&url)
            .send()
            .await
            .map_err(|e| BrokerError::NoPriceOracle(e.to_string()))?
            .json()
            .await
            .map_err(|e| BrokerError::NoPriceOracle(e.to_string()))?;
        let price = response
            .prices
            .get(coin_id)
            .and_then(|m| m.get("usd"))
            .copied()
            .ok_or_else(|| BrokerError::NoPriceOracle(format!("no usd price for {coin_id}")))?;
        Ok(PriceQuote {
            price: Decimal::from_str(&price.to_string()).unwrap_or_default(),
            source: "coingecko".to_string(),
        })
    }

    fn get_operator_address(&self) -> Option<String> {
        self.cfg.operator_address.clone()
    }

    fn get_tank_address(&self) -> Option<String> {
        self.cfg.tank_address.clone()
    }

    async fn current_gas_price(&self) -> BrokerResult<u128> {
        let provider = self.connect().await?;
        provider
            .get_gas_price()
            .await
            .map_err(|e| BrokerError::Plugin(format!("get_gas_price: {e}")))
    }

    async fn native_balance(&self, address: &str) -> BrokerResult<Decimal> {
        let provider = self.connect().await?;
        let addr = Self::parse_address(address)?;
        let balance = provider
            .get_balance(addr)
            .await
            .map_err(|e| BrokerError::Plugin(format!("get_balance: {e}")))?;
        Ok(Self::wei_to_decimal(balance))
    }

    async fn estimate_approval_gas_cost(&self) -> BrokerResult<Decimal> {
        let gas_price = self.current_gas_price().await?;
        let wei = (APPROVE_GAS_UNITS as f64 * GAS_ESTIMATE_SAFETY_MARGIN * gas_price as f64) as u128;
        Ok(Self::wei_to_decimal(U256::from(wei)))
    }

    async fn estimate_native_transfer_gas_cost(&self) -> BrokerResult<Decimal> {
        let gas_price = self.current_gas_price().await?;
        let wei = (TRANSFER_GAS_UNITS as f64 * GAS_ESTIMATE_SAFETY_MARGIN * gas_price as f64) as u128;
        Ok(Self::wei_to_decimal(U256::from(wei)))
    }
}

/// The `IBroker` interface is exposed separately for call sites (dispatcher,
/// recovery) that need to build the operator-signed native call or the
/// `processedDeals` idempotency check rather than a plain value transfer.
pub fn broker_contract<'a, P: Provider>(address: &str, provider: &'a P) -> BrokerResult<IBroker::IBrokerInstance<&'a P>> {
    let addr = EvmChainPlugin::parse_address(address)?;
    Ok(IBroker::new(addr, provider))
}

fn classify_send_error(message: String) -> BrokerError {
    let lower = message.to_lowercase();
    if lower.contains("unauthorized") || lower.contains("not operator") || lower.contains("onlyoperator") {
        BrokerError::UnauthorizedOperator(message)
    } else if lower.contains("already") || lower.contains("processed") || lower.contains("invalid state") {
        BrokerError::AlreadyExecuted(message)
    } else if lower.contains("insufficient") {
        BrokerError::InsufficientBalance(message)
    } else if lower.contains("timeout") || lower.contains("deadline") {
        BrokerError::DeadlineExceeded(message)
    } else {
        warn!(error = %message, "unclassified submission error, treating as transfer failure");
        BrokerError::TransferFailed(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_index_is_deterministic_and_side_distinct() {
        let deal = DealId::new();
        let a = derivation_index(deal, Side::A);
        let b = derivation_index(deal, Side::B);
        assert_ne!(a, b);
        assert_eq!(a, derivation_index(deal, Side::A));
    }

    #[test]
    fn wei_decimal_roundtrip_is_stable() {
        let wei = U256::from(1_500_000_000_000_000_000u128);
        let decimal = EvmChainPlugin::wei_to_decimal(wei);
        assert_eq!(decimal, Decimal::new(15, 1));
        let back = EvmChainPlugin::amount_to_wei(decimal).unwrap();
        assert_eq!(back, wei);
    }
}
