mod bundler;
mod config;
mod contracts;
mod encoding;
mod error;
mod gateway;
mod orchestrator;
mod paymaster;
mod plugin_client;
mod rpc;
mod smart_account;
mod subscription_plugin;
#[cfg(test)]
mod testing;
mod types;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::{Deployment, Settings, SettingsInput};
use encoding::{fmt_address, fmt_h256};
use ethers::prelude::*;
use gateway::{SubscriptionGateway, SubscriptionRecord};
use orchestrator::UserAccount;
use plugin_client::{PluginClient, ProductDetails, RecurringPayment};
use smart_account::{connect_provider, ModularAccountClient, SmartAccount};
use std::path::PathBuf;
use std::sync::Arc;
use types::Plan;

#[derive(Parser, Debug)]
#[command(name = "subplug", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the owner, the counterfactual smart account and its deployment status.
    Account(AccountArgs),

    /// Read the account's subscriptions from the gateway.
    Subscriptions(SubscriptionsArgs),

    /// Subscribe the smart account to a plan through the gateway.
    Subscribe(SubscribeArgs),

    /// Charge a due subscription from the operator EOA.
    Charge(ChargeArgs),

    /// Manage the Subscription Plugin on the smart account and call into it.
    Plugin(PluginArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Deployment profile (addresses, chain id, token decimals).
    #[arg(long, env = "SUBPLUG_DEPLOYMENT", default_value = "deployments/polygon-amoy.json")]
    deployment: PathBuf,

    /// Override the chain RPC URL (otherwise profile `rpc`, then Alchemy).
    #[arg(long, env = "SUBPLUG_RPC_URL")]
    rpc: Option<String>,

    /// Override the ERC-4337 bundler URL.
    #[arg(long, env = "SUBPLUG_BUNDLER_URL")]
    bundler_url: Option<String>,

    /// Override the ERC-7677 paymaster URL.
    #[arg(long, env = "SUBPLUG_PAYMASTER_URL")]
    paymaster_url: Option<String>,

    #[arg(long, env = "SUBPLUG_ALCHEMY_API_KEY", hide_env_values = true)]
    alchemy_api_key: Option<String>,

    /// Gas-manager policy used to sponsor every user operation.
    #[arg(long, env = "SUBPLUG_GAS_POLICY_ID")]
    gas_policy_id: Option<String>,

    /// Smart account owner private key.
    ///
    /// Recommended: set via env var SUBPLUG_OWNER_PRIVATE_KEY.
    #[arg(long, env = "SUBPLUG_OWNER_PRIVATE_KEY", hide_env_values = true)]
    owner_private_key: Option<String>,

    /// EOA key used by `charge`.
    #[arg(long, env = "SUBPLUG_OPERATOR_PRIVATE_KEY", hide_env_values = true)]
    operator_private_key: Option<String>,

    /// Salt for the smart account address.
    #[arg(long, env = "SUBPLUG_ACCOUNT_SALT", default_value_t = 0)]
    salt: u64,

    /// Fee multiplier over eth_gasPrice, in basis points.
    #[arg(long, env = "SUBPLUG_GAS_MULTIPLIER_BPS", default_value_t = 10_000)]
    gas_multiplier_bps: u64,

    /// How long to wait for a user operation receipt (0 = forever).
    #[arg(long, default_value_t = 180)]
    max_wait_seconds: u64,
}

#[derive(Args, Debug)]
struct AccountArgs {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct SubscriptionsArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Subscription to look up in detail.
    #[arg(long, default_value_t = 0)]
    subscription_id: u64,
}

#[derive(Args, Debug)]
struct SubscribeArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    plan_id: u64,

    #[arg(long)]
    duration_seconds: u64,
}

#[derive(Args, Debug)]
struct ChargeArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[arg(long)]
    subscription_id: u64,

    /// Subscriber to charge (defaults to the owner's smart account).
    #[arg(long, value_parser = parse_address)]
    subscriber: Option<Address>,
}

#[derive(Args, Debug)]
struct PluginArgs {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    cmd: PluginCommand,
}

#[derive(Args, Debug, Clone)]
struct ProductArgs {
    #[arg(long)]
    name: String,

    #[arg(long, default_value = "")]
    description: String,

    #[arg(long, default_value = "")]
    logo_url: String,

    /// ERC-20 token subscribers pay in.
    #[arg(long, value_parser = parse_address)]
    charge_token: Address,

    #[arg(long, value_parser = parse_address)]
    recipient: Address,

    #[arg(long)]
    destination_chain: u64,
}

impl From<ProductArgs> for ProductDetails {
    fn from(a: ProductArgs) -> Self {
        Self {
            name: a.name,
            description: a.description,
            logo_url: a.logo_url,
            charge_token: a.charge_token,
            recipient: a.recipient,
            destination_chain: a.destination_chain,
        }
    }
}

#[derive(Subcommand, Debug)]
enum PluginCommand {
    /// Show whether the plugin is installed and list installed plugins.
    Status,

    /// Install the plugin if it is missing and verify the install.
    Install,

    Uninstall,

    #[command(flatten)]
    Call(PluginCall),
}

/// Operations that require the plugin; each runs after `ensure_installed`.
#[derive(Subcommand, Debug)]
enum PluginCall {
    CreateProduct {
        #[command(flatten)]
        product: ProductArgs,
    },

    UpdateProduct {
        #[arg(long)]
        product_id: u64,

        #[arg(long, value_parser = parse_address)]
        recipient: Address,

        #[arg(long)]
        destination_chain: u64,

        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        active: bool,
    },

    CreatePlan {
        #[arg(long)]
        product_id: u64,

        #[arg(long)]
        charge_interval: u64,

        /// Whole-token price, scaled by 10^decimals before encoding.
        #[arg(long, value_parser = parse_u256)]
        price: U256,

        /// Token decimals (defaults to the profile's tokenDecimals).
        #[arg(long)]
        decimals: Option<u32>,
    },

    UpdatePlan {
        #[arg(long)]
        plan_id: u64,

        #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
        active: bool,
    },

    CreateProductWithPlans {
        #[command(flatten)]
        product: ProductArgs,

        /// `PRICE:INTERVAL`, repeatable.
        #[arg(long = "plan", required = true)]
        plans: Vec<Plan>,

        #[arg(long)]
        decimals: Option<u32>,
    },

    CreateRecurringPayment {
        #[command(flatten)]
        product: ProductArgs,

        #[arg(long)]
        charge_interval: u64,

        /// Unix timestamp; 0 means no end.
        #[arg(long, default_value_t = 0)]
        end_time: u64,

        #[arg(long, value_parser = parse_u256)]
        price: U256,

        #[arg(long)]
        decimals: Option<u32>,
    },

    Subscribe {
        #[arg(long)]
        plan_id: u64,

        #[arg(long, default_value_t = 0)]
        end_time: u64,
    },

    Unsubscribe {
        #[arg(long)]
        subscription_id: u64,
    },

    ChangeEndTime {
        #[arg(long)]
        subscription_id: u64,

        #[arg(long)]
        end_time: u64,
    },
}

fn parse_u256(s: &str) -> std::result::Result<U256, String> {
    U256::from_dec_str(s.trim()).map_err(|e| format!("invalid amount {s:?}: {e}"))
}

fn parse_address(s: &str) -> std::result::Result<Address, String> {
    s.parse::<Address>().map_err(|e| format!("invalid address {s:?}: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        // stdout carries command results only.
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Account(args) => cmd_account(args).await,
        Command::Subscriptions(args) => cmd_subscriptions(args).await,
        Command::Subscribe(args) => cmd_subscribe(args).await,
        Command::Charge(args) => cmd_charge(args).await,
        Command::Plugin(args) => cmd_plugin(args).await,
    }
}

fn load_settings(common: &CommonArgs) -> Result<Settings> {
    let deployment = Deployment::load(&common.deployment)?;
    let settings = Settings::resolve(
        deployment,
        SettingsInput {
            owner_private_key: common.owner_private_key.clone(),
            operator_private_key: common.operator_private_key.clone(),
            alchemy_api_key: common.alchemy_api_key.clone(),
            gas_policy_id: common.gas_policy_id.clone(),
            rpc_url: common.rpc.clone(),
            bundler_url: common.bundler_url.clone(),
            paymaster_url: common.paymaster_url.clone(),
            account_salt: common.salt,
            gas_multiplier_bps: common.gas_multiplier_bps,
            max_wait_seconds: common.max_wait_seconds,
        },
    )?;
    Ok(settings)
}

type LiveAccount = ModularAccountClient<Provider<Http>>;

fn gateway_for(settings: &Settings, user: &UserAccount<LiveAccount>) -> SubscriptionGateway<Provider<Http>> {
    SubscriptionGateway::new(
        settings.deployment.subscription_gateway,
        user.account().client(),
    )
}

fn print_record(label: &str, r: &SubscriptionRecord) {
    println!(
        "{label}: id={} plan={} subscriber={} start={} end={} lastCharged={} active={}",
        r.id,
        r.plan_id,
        fmt_address(r.subscriber),
        r.start_time,
        r.end_time,
        r.last_charged_at,
        r.is_active
    );
}

async fn cmd_account(args: AccountArgs) -> Result<()> {
    let settings = load_settings(&args.common)?;
    let user = UserAccount::initialize_account_client(&settings).await?;

    let deployed = user.account().is_deployed().await?;
    println!("owner:         {}", fmt_address(user.account().owner()));
    println!("smart account: {}", fmt_address(user.address()));
    println!("deployed:      {deployed}");
    Ok(())
}

async fn cmd_subscriptions(args: SubscriptionsArgs) -> Result<()> {
    let settings = load_settings(&args.common)?;
    let user = UserAccount::initialize_account_client(&settings).await?;
    let gateway = gateway_for(&settings, &user);
    let id = U256::from(args.subscription_id);

    let subscriptions = user.get_subscriptions(&gateway).await?;
    println!("subscriptions of {}: {}", fmt_address(user.address()), subscriptions.len());
    for s in &subscriptions {
        print_record("  subscription", s);
    }

    print_record("info", &user.get_subscription_info(&gateway, id).await?);
    print_record("by id", &gateway.get_subscription_by_id(id).await?);
    println!("plans: {}", gateway.num_subscription_plans().await?);
    Ok(())
}

async fn cmd_subscribe(args: SubscribeArgs) -> Result<()> {
    let settings = load_settings(&args.common)?;
    let user = UserAccount::initialize_account_client(&settings).await?;
    let gateway = gateway_for(&settings, &user);

    let tx = user
        .subscribe(
            &gateway,
            U256::from(args.plan_id),
            U256::from(args.duration_seconds),
        )
        .await?;
    println!("{}", fmt_h256(tx));
    Ok(())
}

async fn cmd_charge(args: ChargeArgs) -> Result<()> {
    let settings = load_settings(&args.common)?;
    let operator = settings.operator()?.clone();
    let provider = connect_provider(&settings).await?;

    let subscriber = match args.subscriber {
        Some(s) => s,
        None => {
            let account = ModularAccountClient::connect(&settings, provider.clone()).await?;
            account.address()
        }
    };

    let signer = Arc::new(SignerMiddleware::new((*provider).clone(), operator));
    let gateway = SubscriptionGateway::new(settings.deployment.subscription_gateway, signer);
    let tx = gateway
        .charge(U256::from(args.subscription_id), subscriber)
        .await?;
    println!("{}", fmt_h256(tx));
    Ok(())
}

async fn cmd_plugin(args: PluginArgs) -> Result<()> {
    let settings = load_settings(&args.common)?;
    let dep = settings.deployment.clone();
    let decimals_or = |d: Option<u32>| d.unwrap_or(u32::from(dep.token_decimals));

    let user = UserAccount::initialize_account_client(&settings).await?;
    let plugin = PluginClient::new(
        dep.chain_id,
        dep.subscription_plugin,
        dep.dependency_plugin,
        user.into_account(),
    );

    let tx = match args.cmd {
        PluginCommand::Status => {
            let installed = plugin.installed_plugins().await?;
            println!("account:   {}", fmt_address(plugin.account().address()));
            println!("plugin:    {}", fmt_address(plugin.plugin_address()));
            println!("installed: {}", installed.contains(&plugin.plugin_address()));
            for p in installed {
                println!("  {}", fmt_address(p));
            }
            return Ok(());
        }
        PluginCommand::Install => {
            plugin.ensure_installed().await?;
            println!("installed: {}", fmt_address(plugin.plugin_address()));
            return Ok(());
        }
        PluginCommand::Uninstall => plugin.uninstall_plugin().await?,
        PluginCommand::Call(call) => {
            let session = plugin.ensure_installed().await?;
            match call {
                PluginCall::CreateProduct { product } => {
                    session.create_product(&product.into()).await?
                }
                PluginCall::UpdateProduct {
                    product_id,
                    recipient,
                    destination_chain,
                    active,
                } => {
                    session
                        .update_product(U256::from(product_id), recipient, destination_chain, active)
                        .await?
                }
                PluginCall::CreatePlan {
                    product_id,
                    charge_interval,
                    price,
                    decimals,
                } => {
                    session
                        .create_plan(
                            U256::from(product_id),
                            charge_interval,
                            price,
                            decimals_or(decimals),
                        )
                        .await?
                }
                PluginCall::UpdatePlan { plan_id, active } => {
                    session.update_plan(U256::from(plan_id), active).await?
                }
                PluginCall::CreateProductWithPlans {
                    product,
                    plans,
                    decimals,
                } => {
                    session
                        .create_product_with_plans(&product.into(), &plans, decimals_or(decimals))
                        .await?
                }
                PluginCall::CreateRecurringPayment {
                    product,
                    charge_interval,
                    end_time,
                    price,
                    decimals,
                } => {
                    let payment = RecurringPayment {
                        name: product.name,
                        description: product.description,
                        logo_url: product.logo_url,
                        charge_token: product.charge_token,
                        recipient: product.recipient,
                        destination_chain: product.destination_chain,
                        charge_interval,
                        end_time,
                        price,
                    };
                    session
                        .create_recurring_payment(&payment, decimals_or(decimals))
                        .await?
                }
                PluginCall::Subscribe { plan_id, end_time } => {
                    session.subscribe(U256::from(plan_id), end_time).await?
                }
                PluginCall::Unsubscribe { subscription_id } => {
                    session.unsubscribe(U256::from(subscription_id)).await?
                }
                PluginCall::ChangeEndTime {
                    subscription_id,
                    end_time,
                } => {
                    session
                        .change_subscription_end_time(U256::from(subscription_id), end_time)
                        .await?
                }
            }
        }
    };

    println!("{}", fmt_h256(tx));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_product_with_plans() {
        let cli = Cli::try_parse_from([
            "subplug",
            "plugin",
            "--owner-private-key",
            "0x01",
            "create-product-with-plans",
            "--name",
            "Pro",
            "--charge-token",
            "0x0Fd9e8d3aF1aaee056EB9e802c3A762a667b1904",
            "--recipient",
            "0xF65330dC75e32B20Be62f503a337cD1a072f898f",
            "--destination-chain",
            "80002",
            "--plan",
            "5:2592000",
            "--plan",
            "50:31536000",
        ])
        .unwrap();

        let Command::Plugin(args) = cli.cmd else {
            panic!("expected plugin command");
        };
        let PluginCommand::Call(PluginCall::CreateProductWithPlans { plans, decimals, .. }) = args.cmd
        else {
            panic!("expected create-product-with-plans");
        };
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].price, U256::from(50));
        assert_eq!(plans[1].charge_interval, 31_536_000);
        assert_eq!(decimals, None);
        assert_eq!(args.common.gas_multiplier_bps, 10_000);
    }

    #[test]
    fn cli_prices_keep_full_precision() {
        // Larger than u64::MAX.
        let big = "123456789012345678901234567890";
        let cli = Cli::try_parse_from([
            "subplug",
            "plugin",
            "create-plan",
            "--product-id",
            "3",
            "--charge-interval",
            "3600",
            "--price",
            big,
        ])
        .unwrap();

        let Command::Plugin(args) = cli.cmd else {
            panic!("expected plugin command");
        };
        let PluginCommand::Call(PluginCall::CreatePlan { price, .. }) = args.cmd else {
            panic!("expected create-plan");
        };
        assert_eq!(price, U256::from_dec_str(big).unwrap());

        assert!(parse_u256("-1").is_err());
        assert!(parse_u256("1.5").is_err());
    }

    #[test]
    fn cli_rejects_bad_address() {
        let res = Cli::try_parse_from([
            "subplug",
            "charge",
            "--subscription-id",
            "0",
            "--subscriber",
            "0x1234",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
