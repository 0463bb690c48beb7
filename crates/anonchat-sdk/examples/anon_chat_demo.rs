//! 匿名聊天演示
//!
//! 两个匿名用户共享一个内存后端：登录、建会话、互发消息、观察会话列表，
//! 最后演示前后台切换和一次订阅购买。

use std::sync::Arc;
use std::time::Duration;

use anonchat_sdk::backend::memory::{MemoryBillingConnection, MemoryDocumentStore, MemoryIdentityProvider};
use anonchat_sdk::{AnonChatConfig, AnonChatSDK, Backends, BillingResponse, DataEnvelope};
use futures::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n==============================================");
    println!("🕶️  AnonChat SDK 演示");
    println!("==============================================\n");

    let store = MemoryDocumentStore::new();
    let billing = Arc::new(MemoryBillingConnection::new());
    let config = AnonChatConfig::builder().timezone_hours(8).build();

    let alice = AnonChatSDK::initialize(
        config.clone(),
        Backends::new(Arc::new(store.clone()), Arc::new(MemoryIdentityProvider::new()))
            .with_billing(billing.clone()),
    )
    .await?;
    let bob = AnonChatSDK::initialize(
        config,
        Backends::new(Arc::new(store.clone()), Arc::new(MemoryIdentityProvider::new())),
    )
    .await?;

    let alice_uid = alice.wait_until_signed_in().await?;
    let bob_uid = bob.wait_until_signed_in().await?;
    println!("1️⃣ 匿名登录完成: alice={} bob={}", alice_uid, bob_uid);

    // 用户列表不包含自己
    let mut users = alice.users();
    if let Some(DataEnvelope::Success(list)) = users.next().await {
        for user in &list {
            println!(
                "2️⃣ alice 看到的用户: {} ({:?}, 最后活跃 {})",
                user.uid(),
                user.presence(anonchat_sdk::now_utc()),
                alice.format_last_seen(user).unwrap_or_default()
            );
        }
    }
    users.close();

    let chat_id = alice.create_chat(&bob_uid).await?;
    println!("3️⃣ 会话已创建: {}", chat_id);

    let mut thread = bob.thread(&chat_id)?;
    alice.send_message(&chat_id, "你好，陌生人").await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    bob.send_message(&chat_id, "你好！").await?;

    if let Some(state) = thread.wait_until(|state| state.messages().len() == 2).await {
        println!("4️⃣ bob 的会话（最新在前）:");
        for message in state.messages() {
            let direction = if state.is_outgoing(message) { "→" } else { "←" };
            println!(
                "   {} [{}] {}",
                direction,
                bob.formatter().format_time_short(message.time),
                message.value
            );
        }
    }
    thread.close();

    let mut list = alice.chat_list();
    if let Some(state) = list.wait_until(|state| !state.is_loading()).await {
        for chat in state.chats() {
            println!("5️⃣ alice 的会话: 与 {} 聊天", chat.opponent(&alice_uid));
        }
    }
    list.close();

    // 前台：心跳开始，计费连接建立
    alice.on_app_foreground().await?;
    let mut results = alice.purchase_results()?;
    alice.start_purchase("premium_monthly")?;
    tokio::time::sleep(Duration::from_millis(10)).await;
    if let Some(manager) = alice.billing_manager() {
        manager.on_purchases_updated(BillingResponse::Ok);
    }
    results.changed().await?;
    println!("6️⃣ 购买结果: {:?}", *results.borrow());
    alice.on_app_background().await?;

    alice.shutdown().await?;
    bob.shutdown().await?;

    println!("\n==============================================");
    println!("✅ 演示完成");
    println!("==============================================\n");
    Ok(())
}
