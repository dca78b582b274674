//! Password encryption for the login form.

use base64::{Engine, engine::general_purpose::STANDARD};
use emtl_session::{Error, Result};
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};

/// Public key the service expects login passwords to be encrypted with.
const LOGIN_PUBLIC_KEY: &str = "-----BEGIN PUBLIC KEY-----
MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDHdsyxT66pDG4p73yope7jxA92
c0AT4qIJ/xtbBcHkFPK77upnsfDTJiVEuQDH+MiMeb+XhCLNKZGp0yaUU6GlxZdp
+nLW8b7Kmijr3iepaDhcbVTsYBWchaWUXauj9Lrhz58/6AE/NF0aMolxIGpsi+ST
2hSHPu3GSXMdhPCkWQIDAQAB
-----END PUBLIC KEY-----
";

/// RSA PKCS#1 v1.5 encrypt `plaintext` and base64 encode the result.
pub fn encrypt_password(plaintext: &str) -> Result<String> {
    let key = RsaPublicKey::from_public_key_pem(LOGIN_PUBLIC_KEY)
        .map_err(|e| Error::Config(format!("invalid login public key: {e}")))?;
    let cipher = key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext.as_bytes())
        .map_err(|e| Error::Config(format!("failed to encrypt password: {e}")))?;
    Ok(STANDARD.encode(cipher))
}
