mod helpers;
mod mocks;

mod auth;
mod orders;
mod products;
mod recharge;
mod wallet;
