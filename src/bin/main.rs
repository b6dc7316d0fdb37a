//! pdf-signer command line interface.

use clap::{Parser, Subcommand};
use miette::Result;
use pdf_signer::{
    sign_pdf_file, verify_pdf_file, AppearanceOptions, CertType, DigestAlgorithm, DocMdpPerm,
    FieldFillOptions, HttpSettings, SignError, SignOptions, SignatureMeta, SigningMaterial,
    SigningProfile, TsaOptions, TsaUrl, VerifyOptions,
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pdf-signer")]
#[command(about = "Sign PDF documents and verify the signatures they carry")]
#[command(long_about = "
pdf-signer - PDF digital signatures with CMS and RFC 3161 timestamps

EXAMPLES:
    # Approval signature with metadata
    pdf-signer sign -n \"Jane Signer\" --reason Approval in.pdf out.pdf cert.crt key.key

    # Certification signature restricting later edits to form filling
    pdf-signer sign --cert-type certification --docmdp 2 in.pdf out.pdf cert.crt key.key chain.crt

    # Timestamped signature
    pdf-signer sign --tsa http://tsa.example/tsr in.pdf out.pdf cert.crt key.key

    # Verify, allowing the embedded self-signed root (testing only)
    pdf-signer verify --allow-untrusted-roots signed.pdf

ENVIRONMENT VARIABLES:
    RUST_LOG              Logging level (debug, info, warn, error)
    HTTP_PROXY/HTTPS_PROXY  Proxy for TSA and revocation traffic
")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign a PDF document
    Sign {
        /// Input PDF
        #[arg(value_name = "IN_PDF")]
        input: PathBuf,
        /// Output PDF
        #[arg(value_name = "OUT_PDF")]
        output: PathBuf,
        /// PEM certificate of the signer
        #[arg(value_name = "CERT_FILE")]
        cert: PathBuf,
        /// PEM private key of the signer
        #[arg(value_name = "KEY_FILE")]
        key: PathBuf,
        /// Optional PEM bundle with intermediate certificates
        #[arg(value_name = "CHAIN_FILE")]
        chain: Option<PathBuf>,

        /// Name of the signatory
        #[arg(short, long)]
        name: Option<String>,
        /// Location of signing
        #[arg(long)]
        location: Option<String>,
        /// Reason for signing
        #[arg(long)]
        reason: Option<String>,
        /// Contact information
        #[arg(long)]
        contact: Option<String>,

        /// Signature kind: approval, certification, usage-rights, timestamp
        #[arg(long, default_value = "approval")]
        cert_type: String,
        /// DocMDP permission for certification signatures (1, 2 or 3)
        #[arg(long, default_value_t = 2)]
        docmdp: u8,

        /// Timestamp authority URL
        #[arg(long)]
        tsa: Option<String>,
        /// TSA HTTP basic auth user
        #[arg(long)]
        tsa_user: Option<String>,
        /// TSA HTTP basic auth password
        #[arg(long)]
        tsa_pass: Option<String>,

        /// Digest algorithm: sha256, sha384, sha512
        #[arg(long, default_value = "sha256")]
        digest: String,
        /// CMS reservation size in bytes
        #[arg(long, default_value_t = 4096)]
        placeholder: usize,

        /// Signer UID for initials/date form fields
        #[arg(long)]
        signer_uid: Option<String>,
        /// Date layout for date fields (time format-description syntax)
        #[arg(long)]
        date_format: Option<String>,
        /// BCP 47 locale for date fields
        #[arg(long)]
        locale: Option<String>,

        /// Draw a visible signature block
        #[arg(long)]
        visible: bool,
        /// Page carrying the visible signature (1-based)
        #[arg(long, default_value_t = 1)]
        page: u32,
        /// Visible signature rectangle: llx,lly,urx,ury
        #[arg(long, value_name = "RECT", default_value = "10,10,200,60")]
        rect: String,

        /// TOML signing profile supplying defaults for the flags above
        #[arg(long)]
        profile: Option<PathBuf>,
    },

    /// Verify all signatures in a PDF and print the verdict as JSON
    Verify {
        /// Signed PDF
        #[arg(value_name = "IN_PDF")]
        input: PathBuf,

        /// Enable external OCSP/CRL lookups
        #[arg(long)]
        external: bool,
        /// Require the Digital Signature key usage bit
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        require_digital_signature: bool,
        /// Require the Non-Repudiation key usage bit
        #[arg(long)]
        require_non_repudiation: bool,
        /// Trust the signer-claimed signing time when no timestamp exists
        #[arg(long)]
        trust_signature_time: bool,
        /// Validate the timestamp token's certificate chain
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        validate_timestamp_certs: bool,
        /// Promote embedded self-signed certificates to trusted roots
        #[arg(long)]
        allow_untrusted_roots: bool,
        /// HTTP timeout in seconds for external lookups
        #[arg(long, default_value_t = 10)]
        http_timeout: u64,
        /// Explicit proxy URL (overrides environment proxies)
        #[arg(long)]
        proxy: Option<String>,
        /// Exit non-zero unless every signature is valid and trusted
        #[arg(long)]
        strict: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Sign {
            input,
            output,
            cert,
            key,
            chain,
            name,
            location,
            reason,
            contact,
            cert_type,
            docmdp,
            tsa,
            tsa_user,
            tsa_pass,
            digest,
            placeholder,
            signer_uid,
            date_format,
            locale,
            visible,
            page,
            rect,
            profile,
        } => {
            let profile = match profile {
                Some(path) => SigningProfile::load(path)?,
                None => SigningProfile::default(),
            };

            // the profile's digest applies unless the flag was set explicitly
            let digest_name = match (&profile.digest_algorithm, digest.as_str()) {
                (Some(from_profile), "sha256") => from_profile.clone(),
                _ => digest,
            };
            let digest_algorithm: DigestAlgorithm = digest_name.parse()?;
            let cert_type: CertType = cert_type.parse()?;

            let tsa_url = tsa.or_else(|| profile.tsa_url.clone());
            let tsa_options = match tsa_url {
                Some(url) => Some(TsaOptions {
                    url: TsaUrl::new(&url)?,
                    username: tsa_user.or_else(|| profile.tsa_username.clone()),
                    password: tsa_pass.or_else(|| profile.tsa_password.clone()),
                }),
                None => None,
            };

            let options = SignOptions {
                digest_algorithm,
                cert_type,
                docmdp_perm: DocMdpPerm::from_level(docmdp)?,
                meta: SignatureMeta {
                    name: name.or_else(|| profile.name.clone()),
                    location: location.or_else(|| profile.location.clone()),
                    reason: reason.or_else(|| profile.reason.clone()),
                    contact_info: contact.or_else(|| profile.contact_info.clone()),
                    date: None,
                },
                tsa: tsa_options,
                appearance: AppearanceOptions {
                    visible,
                    page,
                    rect: parse_rect(&rect)?,
                },
                fields: FieldFillOptions {
                    signer_uid: signer_uid.or_else(|| profile.signer_uid.clone()),
                    date_format: date_format.or_else(|| profile.date_format.clone()),
                    locale: locale.or_else(|| profile.locale.clone()),
                },
                placeholder_capacity: placeholder,
                revocation: None,
                http: HttpSettings::default(),
            };

            let material = SigningMaterial::from_pem_files(&cert, &key, chain.as_ref())?;
            sign_pdf_file(&input, &output, &material, options).await?;
            println!("signed {} -> {}", input.display(), output.display());
            Ok(())
        }

        Commands::Verify {
            input,
            external,
            require_digital_signature,
            require_non_repudiation,
            trust_signature_time,
            validate_timestamp_certs,
            allow_untrusted_roots,
            http_timeout,
            proxy,
            strict,
        } => {
            let options = VerifyOptions {
                enable_external_revocation_check: external,
                require_digital_signature_ku: require_digital_signature,
                require_non_repudiation,
                trust_signature_time,
                validate_timestamp_certificates: validate_timestamp_certs,
                allow_untrusted_roots,
                http: HttpSettings {
                    timeout: Some(Duration::from_secs(http_timeout)),
                    proxy_url: proxy,
                },
                ..Default::default()
            };

            let report = verify_pdf_file(&input, options).await?;
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| SignError::ValidationError(format!("cannot render verdict: {e}")))?;
            println!("{json}");

            if strict && !report.all_valid_and_trusted() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

fn parse_rect(text: &str) -> std::result::Result<[f64; 4], SignError> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(SignError::ConfigError(format!(
            "rectangle must be llx,lly,urx,ury: {text}"
        )));
    }
    let mut rect = [0.0; 4];
    for (slot, part) in rect.iter_mut().zip(parts) {
        *slot = part
            .parse()
            .map_err(|_| SignError::ConfigError(format!("bad rectangle value {part:?}")))?;
    }
    Ok(rect)
}
